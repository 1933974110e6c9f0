//! toolgate-gateway: admission primitives for the HTTP surface. Auth
//! guard, per-client rate limiter, and request-latency window; all pure
//! state machines with caller-supplied clocks.

pub mod auth;
pub mod latency_window;
pub mod rate_limit;
