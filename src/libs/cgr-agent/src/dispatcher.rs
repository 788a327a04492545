//! Request dispatcher
//!
//! Runs one request processor against an [`AgentRequest`]: request
//! templates, the session service call selected by the processor flags,
//! the optional CDR side-call and finally the reply templates.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::RequestProcessor;
use crate::error::{AgentError, AgentResult};
use crate::event::{CgrEvent, USAGE};
use crate::path::PathItem;
use crate::request::{AgentRequest, ERROR_FIELD};
use crate::tree::{DataItem, DataMap};
use crate::value::DataValue;

pub const META_DRYRUN: &str = "*dryrun";
pub const META_AUTHORIZE: &str = "*auth";
pub const META_INITIATE: &str = "*initiate";
pub const META_UPDATE: &str = "*update";
pub const META_TERMINATE: &str = "*terminate";
pub const META_MESSAGE: &str = "*message";
pub const META_EVENT: &str = "*event";
pub const META_CDRS: &str = "*cdrs";
pub const META_NONE: &str = "*none";
pub const META_CONTINUE: &str = "*continue";
pub const META_LOG: &str = "*log";
pub const META_ATTRIBUTES: &str = "*attributes";
pub const META_RESOURCES: &str = "*resources";
pub const META_ACCOUNTS: &str = "*accounts";
pub const META_THRESHOLDS: &str = "*thresholds";
pub const META_STATS: &str = "*stats";
pub const META_ROUTES: &str = "*routes";
pub const META_ROUTES_IGNORE_ERRORS: &str = "*routes_ignore_errors";
pub const META_ROUTES_EVENT_COST: &str = "*routes_event_cost";
pub const META_ROUTES_MAX_COST: &str = "*routes_maxcost";
pub const META_FD: &str = "*fd";
pub const META_IDS: &str = "*ids";

pub const RALS_ERROR_PREFIX: &str = "RALS_ERROR";
pub const TOO_BUSY: &str = "TOO_BUSY";

/// Which session service call a processor makes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    DryRun,
    Authorize,
    Initiate,
    Update,
    Terminate,
    Message,
    Event,
    Cdrs,
    None,
}

impl RequestType {
    const PRIORITY: [(&'static str, RequestType); 9] = [
        (META_DRYRUN, RequestType::DryRun),
        (META_AUTHORIZE, RequestType::Authorize),
        (META_INITIATE, RequestType::Initiate),
        (META_UPDATE, RequestType::Update),
        (META_TERMINATE, RequestType::Terminate),
        (META_MESSAGE, RequestType::Message),
        (META_EVENT, RequestType::Event),
        (META_CDRS, RequestType::Cdrs),
        (META_NONE, RequestType::None),
    ];

    /// First request type flag present, in fixed priority order
    pub fn from_flags(flags: &ProcessorFlags) -> Option<Self> {
        Self::PRIORITY
            .iter()
            .find(|(flag, _)| flags.has(flag))
            .map(|(_, t)| *t)
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = Self::PRIORITY
            .iter()
            .find(|(_, t)| t == self)
            .map(|(flag, _)| *flag)
            .unwrap_or(META_NONE);
        f.write_str(name)
    }
}

/// Processor flags such as `*initiate`, `*accounts` or
/// `*attributes:*ids:ATTR_1&ATTR_2`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessorFlags {
    raw: Vec<String>,
    params: HashMap<String, Vec<String>>,
}

impl ProcessorFlags {
    pub fn parse(flags: &[String]) -> Self {
        let mut params = HashMap::with_capacity(flags.len());
        for flag in flags {
            let mut parts = flag.split(':');
            let name = parts.next().unwrap_or_default().to_string();
            let values: Vec<String> = parts.map(str::to_string).collect();
            params.entry(name).or_insert_with(Vec::new).extend(values);
        }
        Self {
            raw: flags.to_vec(),
            params,
        }
    }

    pub fn has(&self, flag: &str) -> bool {
        self.params.contains_key(flag)
    }

    /// Parameters following `flag`
    pub fn params(&self, flag: &str) -> &[String] {
        self.params.get(flag).map(Vec::as_slice).unwrap_or(&[])
    }

    /// IDs given as `flag:*ids:A&B`
    pub fn ids(&self, flag: &str) -> Vec<String> {
        let params = self.params(flag);
        params
            .iter()
            .position(|p| p == META_IDS)
            .and_then(|pos| params.get(pos + 1))
            .map(|ids| ids.split('&').filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Single value given as `flag:value`
    pub fn value(&self, flag: &str) -> Option<&str> {
        self.params(flag).first().map(String::as_str)
    }

    /// Flags as configured
    pub fn as_slice(&self) -> &[String] {
        &self.raw
    }
}

/// Arguments of a session service call
#[derive(Debug, Clone, PartialEq)]
pub struct SessionArgs {
    pub event: CgrEvent,
    pub attributes: bool,
    pub attribute_ids: Vec<String>,
    pub thresholds: bool,
    pub threshold_ids: Vec<String>,
    pub stats: bool,
    pub stat_ids: Vec<String>,
    pub resources: bool,
    pub accounts: bool,
    pub routes: bool,
    pub routes_ignore_errors: bool,
    pub routes_event_cost: bool,
    pub routes_max_cost: Option<String>,
    pub force_duration: bool,
    /// Raw flags, passed through for `*event`
    pub flags: Vec<String>,
}

impl SessionArgs {
    pub fn new(event: CgrEvent, flags: &ProcessorFlags) -> Self {
        Self {
            event,
            attributes: flags.has(META_ATTRIBUTES),
            attribute_ids: flags.ids(META_ATTRIBUTES),
            thresholds: flags.has(META_THRESHOLDS),
            threshold_ids: flags.ids(META_THRESHOLDS),
            stats: flags.has(META_STATS),
            stat_ids: flags.ids(META_STATS),
            resources: flags.has(META_RESOURCES),
            accounts: flags.has(META_ACCOUNTS),
            routes: flags.has(META_ROUTES),
            routes_ignore_errors: flags.has(META_ROUTES_IGNORE_ERRORS),
            routes_event_cost: flags.has(META_ROUTES_EVENT_COST),
            routes_max_cost: flags.value(META_ROUTES_MAX_COST).map(str::to_string),
            force_duration: flags.has(META_FD),
            flags: flags.as_slice().to_vec(),
        }
    }
}

/// Reply of a session service call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionReply {
    pub max_usage: Option<Duration>,
    pub resource_allocation: Option<String>,
    /// Altered event fields
    pub attributes: Vec<(String, DataValue)>,
    pub routes: Option<Vec<String>>,
    pub threshold_ids: Option<Vec<String>>,
    pub stat_queue_ids: Option<Vec<String>>,
}

impl SessionReply {
    pub fn with_max_usage(max_usage: Duration) -> Self {
        Self {
            max_usage: Some(max_usage),
            ..Default::default()
        }
    }

    /// Normalize into the `*cgrep` layout
    ///
    /// `needs_max_usage` forces a zero `MaxUsage` when the service gave none.
    pub fn as_data_map(&self, needs_max_usage: bool) -> AgentResult<DataMap> {
        let mut tree = DataMap::new();
        match self.max_usage {
            Some(d) => tree.set_field("MaxUsage", d)?,
            None if needs_max_usage => tree.set_field("MaxUsage", Duration::ZERO)?,
            None => {}
        }
        if let Some(alloc) = &self.resource_allocation {
            tree.set_field("ResourceAllocation", alloc.as_str())?;
        }
        for (field, value) in &self.attributes {
            let path = [PathItem::new("Attributes"), PathItem::new(field.as_str())];
            tree.set(&path, DataItem::new(value.clone()))?;
        }
        for (name, ids) in [
            ("Routes", &self.routes),
            ("ThresholdIDs", &self.threshold_ids),
            ("StatQueueIDs", &self.stat_queue_ids),
        ] {
            let path = [PathItem::new(name)];
            for id in ids.iter().flatten() {
                tree.append(&path, DataItem::new(id.as_str()))?;
            }
        }
        Ok(tree)
    }
}

/// Failure of a session service call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// Rating subsystem refused the charge
    #[error("RALS_ERROR:{0}")]
    Rating(String),

    /// Admission control rejected the request
    #[error("TOO_BUSY")]
    Busy,

    #[error("SERVER_ERROR: {0}")]
    Service(String),

    /// The service could not be reached
    #[error("TRANSPORT_ERROR: {0}")]
    Transport(String),
}

impl ServiceError {
    pub fn is_rating(&self) -> bool {
        matches!(self, ServiceError::Rating(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ServiceError::Transport(_))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Backend session operations
#[async_trait]
pub trait SessionService: Send + Sync {
    async fn authorize(&self, args: SessionArgs) -> ServiceResult<SessionReply>;

    async fn initiate_session(&self, args: SessionArgs) -> ServiceResult<SessionReply>;

    async fn update_session(&self, args: SessionArgs) -> ServiceResult<SessionReply>;

    async fn terminate_session(&self, args: SessionArgs) -> ServiceResult<()>;

    async fn process_message(&self, args: SessionArgs) -> ServiceResult<SessionReply>;

    async fn process_event(&self, args: SessionArgs) -> ServiceResult<SessionReply>;

    async fn process_cdr(&self, event: CgrEvent) -> ServiceResult<()>;
}

/// Run `processor` against `ar`
///
/// Returns whether the processor handled the request, which is the case
/// whenever its filters pass; `*none` handles it without a session call.
/// Service errors are recorded in `*cgrep.Error`; only transport failures
/// of `*auth` and `*initiate` are returned as errors, as is a processor
/// without any request type flag.
pub async fn process_request(
    processor: &RequestProcessor,
    ar: &mut AgentRequest,
    sessions: &dyn SessionService,
) -> AgentResult<bool> {
    if !ar.pass_filters(&processor.filters)? {
        return Ok(false);
    }
    ar.set_fields(&processor.request_fields)?;
    let req_type = RequestType::from_flags(&processor.flags).ok_or_else(|| {
        AgentError::InvalidRule(format!("processor <{}> has no request type flag", processor.id))
    })?;
    let mut event = CgrEvent::from_data_map(&ar.cgr_request, &ar.tenant)?;
    let log_enabled = processor.flags.has(META_LOG);
    if log_enabled {
        log::info!("LOG, processorID: {}, request: {}", processor.id, ar.summary());
    }

    let args = || SessionArgs::new(event.clone(), &processor.flags);
    match req_type {
        RequestType::None | RequestType::Cdrs => {}
        RequestType::DryRun => {
            log::info!("DRY_RUN, processorID: {}, request: {}", processor.id, ar.summary());
        }
        RequestType::Authorize | RequestType::Initiate | RequestType::Update => {
            let reply = match req_type {
                RequestType::Authorize => sessions.authorize(args()).await,
                RequestType::Initiate => sessions.initiate_session(args()).await,
                _ => sessions.update_session(args()).await,
            };
            if let Err(e) = &reply {
                if e.is_transport() && req_type != RequestType::Update {
                    return Err(AgentError::Service(e.to_string()));
                }
            }
            set_reply(ar, reply, true)?;
        }
        RequestType::Terminate => {
            let reply = sessions.terminate_session(args()).await.map(|_| SessionReply::default());
            set_reply(ar, reply, false)?;
        }
        RequestType::Message | RequestType::Event => {
            let reply = if req_type == RequestType::Message {
                sessions.process_message(args()).await
            } else {
                sessions.process_event(args()).await
            };
            match &reply {
                Err(e) if e.is_rating() => event.set(USAGE, DataValue::Int(0)),
                Ok(SessionReply {
                    max_usage: Some(max_usage),
                    ..
                }) => event.set(USAGE, *max_usage),
                _ => {}
            }
            set_reply(ar, reply, processor.flags.has(META_ACCOUNTS))?;
        }
    }

    if processor.flags.has(META_CDRS) && req_type != RequestType::DryRun {
        if let Err(e) = sessions.process_cdr(event).await {
            log::warn!("processor <{}> CDR processing failed: {e}", processor.id);
            ar.cgr_reply.set_field(ERROR_FIELD, e.to_string())?;
        }
    }

    ar.set_fields(&processor.reply_fields)?;
    if log_enabled || req_type == RequestType::DryRun {
        log::info!("{req_type} processorID: {}, reply: {}", processor.id, ar.summary());
    }
    Ok(true)
}

fn set_reply(
    ar: &mut AgentRequest,
    reply: ServiceResult<SessionReply>,
    needs_max_usage: bool,
) -> AgentResult<()> {
    match reply {
        Ok(reply) => ar.set_cgr_reply(Ok(reply.as_data_map(needs_max_usage)?)),
        Err(e) => {
            log::debug!("session service error: {e}");
            ar.set_cgr_reply(Err(e.to_string()))
        }
    }
}
