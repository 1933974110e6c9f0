//! toolgate-broker: notification lifecycle state machine and session
//! registry. Pure synchronous state, clock injected by the caller.

pub mod broker;
pub mod sessions;

pub use toolgate_core::types;
