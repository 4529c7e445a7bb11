//! CLI command implementations.

pub mod contend;
pub mod write_skew;
