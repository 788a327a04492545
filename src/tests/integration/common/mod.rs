//! Common test utilities and infrastructure
//!
//! - Mock session service recording backend calls
//! - Credit-Control-Request builders
//! - Agent harness with a capabilities-exchanged client

pub mod harness;
pub mod message;
pub mod sessions;

pub use harness::*;
pub use message::*;
pub use sessions::*;
