//! toolgate-core: shared data model and wire contract for the
//! tool-confirmation notification pipeline.

pub mod types;
pub mod wire;
