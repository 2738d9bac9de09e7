//! Shared types and utilities for hiptrace
//!
//! This crate contains the normalized trace event model and small helpers used
//! by the tracer and by collectors that consume its events.

pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::events::*;
