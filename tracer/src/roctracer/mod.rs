//! roctracer integration
//!
//! `bindings` mirrors the native layouts, `facility` is the seam the tracer
//! talks through, and `ffi` (feature `rocm`) implements it against the real
//! libraries.

pub mod bindings;
pub mod facility;

#[cfg(feature = "rocm")]
pub mod ffi;
