//! Data models for the Sealroom client
//!
//! These types are the payloads exchanged with the real-time relay.

mod types;

pub use types::*;
