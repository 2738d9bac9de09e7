//! HIP API and activity tracer
//!
//! Collects GPU operation events from two sources: HIP API callbacks raised
//! on the calling host thread, and activity records the device runtime
//! delivers in buffers. Both paths share correlation IDs, which is how
//! user annotations registered on the callback path end up attached to the
//! device-side events.

pub mod annotation;
pub mod collector;
pub mod decode;
pub mod error;
pub mod hook;
pub mod metrics;
pub mod options;
pub mod roctracer;
pub mod thread;
pub mod tracer;

pub use annotation::{AnnotationMap, AnnotationSource, ScopedAnnotation, ThreadAnnotations};
pub use collector::{EventBuffer, TraceCollector};
pub use error::{Result, TracerError};
pub use options::TracerOptions;
pub use roctracer::facility::TracingFacility;
pub use tracer::RocmTracer;

pub use hiptrace_shared::{EventKind, EventPayload, EventSource, TraceEvent};

#[cfg(feature = "rocm")]
pub use roctracer::ffi::global;
