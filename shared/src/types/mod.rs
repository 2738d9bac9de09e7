//! Trace data types

pub mod events;
