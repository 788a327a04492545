//! Mock session service
//!
//! Records every call in arrival order and answers from a small behaviour
//! table instead of a real charging backend.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use cgr_agent::{CgrEvent, ServiceError, ServiceResult, SessionArgs, SessionReply, SessionService};

/// One recorded backend call
#[derive(Debug, Clone)]
pub struct ServiceCall {
    pub method: &'static str,
    pub event: CgrEvent,
}

/// Session service test double
pub struct MockSessions {
    max_usage: Duration,
    delay: Duration,
    busy_origins: HashSet<String>,
    rating_error: Option<String>,
    calls: Mutex<Vec<ServiceCall>>,
}

impl MockSessions {
    /// Grant `max_usage` to every request
    pub fn granting(max_usage: Duration) -> Self {
        Self {
            max_usage,
            delay: Duration::ZERO,
            busy_origins: HashSet::new(),
            rating_error: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer `TOO_BUSY` for requests whose OriginID is listed
    pub fn busy_for(mut self, origin_id: &str) -> Self {
        self.busy_origins.insert(origin_id.to_string());
        self
    }

    /// Fail every rating call with `RALS_ERROR:<reason>`
    pub fn rating_error(mut self, reason: &str) -> Self {
        self.rating_error = Some(reason.to_string());
        self
    }

    /// Hold every rating call for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    async fn rate(&self, method: &'static str, args: SessionArgs) -> ServiceResult<SessionReply> {
        self.record(method, args.event.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let origin_id = args.event.get("OriginID").map(|v| v.to_string()).unwrap_or_default();
        if self.busy_origins.contains(&origin_id) {
            return Err(ServiceError::Busy);
        }
        if let Some(reason) = &self.rating_error {
            return Err(ServiceError::Rating(reason.clone()));
        }
        Ok(SessionReply::with_max_usage(self.max_usage))
    }

    fn record(&self, method: &'static str, event: CgrEvent) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(ServiceCall { method, event });
        }
    }
}

#[async_trait]
impl SessionService for MockSessions {
    async fn authorize(&self, args: SessionArgs) -> ServiceResult<SessionReply> {
        self.rate("authorize", args).await
    }

    async fn initiate_session(&self, args: SessionArgs) -> ServiceResult<SessionReply> {
        self.rate("initiate_session", args).await
    }

    async fn update_session(&self, args: SessionArgs) -> ServiceResult<SessionReply> {
        self.rate("update_session", args).await
    }

    async fn terminate_session(&self, args: SessionArgs) -> ServiceResult<()> {
        self.record("terminate_session", args.event);
        Ok(())
    }

    async fn process_message(&self, args: SessionArgs) -> ServiceResult<SessionReply> {
        self.rate("process_message", args).await
    }

    async fn process_event(&self, args: SessionArgs) -> ServiceResult<SessionReply> {
        self.rate("process_event", args).await
    }

    async fn process_cdr(&self, event: CgrEvent) -> ServiceResult<()> {
        self.record("process_cdr", event);
        Ok(())
    }
}
