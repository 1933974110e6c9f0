//! toolgate-transcript: reads Claude Code JSONL transcript files and turns
//! them into typed tool invocation and completion records.

pub mod correlation;
pub mod discovery;
pub mod extract;
pub mod tail;

pub use toolgate_core::types;
