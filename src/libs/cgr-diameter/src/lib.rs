//! CGR Diameter Library
//!
//! Diameter side of the charging agent:
//! - Message and AVP codec (RFC 6733) with exact length bookkeeping
//! - YAML dictionaries (base protocol and credit control built in)
//! - Path-based AVP reader and writer used by field templates
//! - TCP transport and base protocol responder (CER, DWR, DPR)
//! - The agent service turning requests into session service calls

pub mod common;
pub mod avp;
pub mod message;
pub mod error;
pub mod dict;
pub mod datatype;
pub mod reader;
pub mod writer;
pub mod cc;
pub mod config;
pub mod transport;
pub mod peer;
pub mod agent;


pub use common::*;
pub use avp::*;
pub use message::*;
pub use error::*;
pub use dict::{AvpDef, AvpType, Dictionary};
pub use reader::DiameterDataProvider;
pub use writer::{set_avp_with_path, update_message_from_tree};
pub use config::*;
pub use transport::*;
pub use peer::*;
pub use agent::DiameterAgent;

/// Diameter protocol version
pub const DIAMETER_VERSION: u8 = 1;
