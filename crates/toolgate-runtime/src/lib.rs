//! Runtime binary internals: CLI, HTTP gateway, and the watching client.

pub mod cli;
pub mod notify_client;
pub mod server;
pub mod watch_loop;
