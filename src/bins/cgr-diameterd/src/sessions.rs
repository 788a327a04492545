//! Local session service
//!
//! Grants every request the usage it asks for, up to a fixed ceiling, and
//! logs CDRs. Lets the agent answer traffic without a remote backend.

use std::time::Duration;

use async_trait::async_trait;
use cgr_agent::event::USAGE;
use cgr_agent::{CgrEvent, ServiceResult, SessionArgs, SessionReply, SessionService};

/// Session service that rates nothing and grants up to `max_usage`
#[derive(Debug, Clone)]
pub struct StaticSessions {
    max_usage: Duration,
}

impl StaticSessions {
    pub fn new(max_usage: Duration) -> Self {
        Self { max_usage }
    }

    fn grant(&self, args: &SessionArgs) -> SessionReply {
        let requested = args
            .event
            .get(USAGE)
            .and_then(|u| u.as_duration().ok())
            .unwrap_or(self.max_usage);
        SessionReply::with_max_usage(requested.min(self.max_usage))
    }
}

#[async_trait]
impl SessionService for StaticSessions {
    async fn authorize(&self, args: SessionArgs) -> ServiceResult<SessionReply> {
        Ok(self.grant(&args))
    }

    async fn initiate_session(&self, args: SessionArgs) -> ServiceResult<SessionReply> {
        log::debug!("Session {} initiated", args.event.id);
        Ok(self.grant(&args))
    }

    async fn update_session(&self, args: SessionArgs) -> ServiceResult<SessionReply> {
        Ok(self.grant(&args))
    }

    async fn terminate_session(&self, args: SessionArgs) -> ServiceResult<()> {
        log::debug!("Session {} terminated", args.event.id);
        Ok(())
    }

    async fn process_message(&self, args: SessionArgs) -> ServiceResult<SessionReply> {
        Ok(self.grant(&args))
    }

    async fn process_event(&self, args: SessionArgs) -> ServiceResult<SessionReply> {
        Ok(self.grant(&args))
    }

    async fn process_cdr(&self, event: CgrEvent) -> ServiceResult<()> {
        log::info!("CDR {} tenant={} fields={:?}", event.id, event.tenant, event.event);
        Ok(())
    }
}
