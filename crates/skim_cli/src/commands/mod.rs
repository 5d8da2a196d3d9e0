//! CLI command implementations.

pub mod checkpoint;
pub mod purge;
pub mod transform;
