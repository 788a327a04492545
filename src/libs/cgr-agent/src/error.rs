//! Agent error types

use thiserror::Error;

/// Errors raised while templating or dispatching a request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("NOT_FOUND")]
    NotFound,

    #[error("MANDATORY_IE_MISSING: [{0}]")]
    MandatoryIeMissing(String),

    #[error("invalid path <{0}>")]
    InvalidPath(String),

    #[error("invalid rule <{0}>")]
    InvalidRule(String),

    #[error("unsupported converter definition: <{0}>")]
    UnsupportedConverter(String),

    #[error("cannot convert <{value}> to {target}")]
    Conversion { value: String, target: &'static str },

    #[error("unsupported type: <{0}>")]
    UnsupportedFieldType(String),

    #[error("unsupported field prefix: <{0}>")]
    UnsupportedSection(String),

    #[error("filter error: {0}")]
    Filter(String),

    #[error("invalid regex: {0}")]
    Regex(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("session service error: {0}")]
    Service(String),

    /// Failure inside a protocol data provider
    #[error("data provider error: {0}")]
    Provider(String),
}

impl AgentError {
    /// Shorthand for a failed conversion of `value` to `target`
    pub fn conversion(value: impl ToString, target: &'static str) -> Self {
        AgentError::Conversion {
            value: value.to_string(),
            target,
        }
    }

    /// True for the not-found signal used by data providers
    pub fn is_not_found(&self) -> bool {
        matches!(self, AgentError::NotFound)
    }
}

impl From<regex::Error> for AgentError {
    fn from(e: regex::Error) -> Self {
        AgentError::Regex(e.to_string())
    }
}

/// Agent result type
pub type AgentResult<T> = Result<T, AgentError>;
