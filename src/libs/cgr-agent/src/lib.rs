//! CGR Agent Templating Library
//!
//! Protocol-neutral core shared by charging protocol agents:
//! - Path-addressable data trees and typed values
//! - RSR field expressions with converters
//! - Field templates (FCTemplate) and the per-message AgentRequest
//! - Filter evaluation
//! - Request dispatch towards a session service

pub mod error;
pub mod value;
pub mod path;
pub mod tree;
pub mod converter;
pub mod rsr;
pub mod filters;
pub mod template;
pub mod request;
pub mod event;
pub mod dispatcher;
pub mod config;


pub use error::*;
pub use value::DataValue;
pub use path::{FullPath, PathItem, Selector, SelectorFilter, NESTING_SEP};
pub use tree::{DataItem, DataMap, DataNode, DataProvider};
pub use rsr::{RsrParser, RsrParsers};
pub use filters::{FilterS, InlineFilterS};
pub use template::{compile_templates, FcTemplate, FcTemplateConfig, FieldType, TemplateSets};
pub use request::{AgentRequest, Section};
pub use event::CgrEvent;
pub use dispatcher::{
    process_request, ProcessorFlags, RequestType, ServiceError, ServiceResult, SessionArgs,
    SessionReply, SessionService,
};
pub use config::{RequestProcessor, RequestProcessorConfig};

/// Default tenant when none is configured
pub const DEFAULT_TENANT: &str = "cgrates.org";
