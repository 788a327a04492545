//! CGR Diameter Agent integration tests
//!
//! Every test drives a real agent over TCP.
//!
//! ## Test Categories
//!
//! - `charging`: credit control scenarios end to end
//! - `peer`: base protocol handling on a connection

pub mod common;
pub mod charging;
pub mod peer;

pub use common::*;
