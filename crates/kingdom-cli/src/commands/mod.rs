//! CLI command implementations for the Kingdom session tools.

pub mod key;
pub mod replay;
