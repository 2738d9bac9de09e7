//! Tracer error types

use crate::roctracer::bindings::{RoctracerStatus, ROCTRACER_STATUS_SUCCESS};
use thiserror::Error;

/// Errors reported by the native tracing facility
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TracerError {
    /// The facility refused an operation (e.g. callback registration failed)
    #[error("roctracer unavailable: {0}")]
    Unavailable(String),

    /// Iterating or flushing the activity buffer failed
    #[error("roctracer internal error: {0}")]
    Internal(String),
}

impl TracerError {
    /// Build an `Unavailable` error from an optional native message
    pub fn unavailable(message: Option<&str>) -> Self {
        TracerError::Unavailable(message.unwrap_or("<unknown>").to_string())
    }

    /// Build an `Internal` error from an optional native message
    pub fn internal(message: Option<&str>) -> Self {
        TracerError::Internal(message.unwrap_or("<unknown>").to_string())
    }

    /// Map a registration or enable/disable status. `message` is only asked
    /// for on failure.
    pub fn check_unavailable(
        status: RoctracerStatus,
        message: impl FnOnce() -> Option<String>,
    ) -> Result<()> {
        if status == ROCTRACER_STATUS_SUCCESS {
            return Ok(());
        }
        Err(TracerError::unavailable(message().as_deref()))
    }

    /// Map an activity flush or record iteration status. `message` is only
    /// asked for on failure.
    pub fn check_internal(
        status: RoctracerStatus,
        message: impl FnOnce() -> Option<String>,
    ) -> Result<()> {
        if status == ROCTRACER_STATUS_SUCCESS {
            return Ok(());
        }
        Err(TracerError::internal(message().as_deref()))
    }
}

pub type Result<T> = std::result::Result<T, TracerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_native_message() {
        assert_eq!(
            TracerError::unavailable(None).to_string(),
            "roctracer unavailable: <unknown>"
        );
        assert_eq!(
            TracerError::internal(Some("bad record")),
            TracerError::Internal("bad record".to_string())
        );
    }

    #[test]
    fn test_native_status_mapping() {
        let untouched = || -> Option<String> { panic!("message read for a successful status") };
        assert_eq!(TracerError::check_unavailable(ROCTRACER_STATUS_SUCCESS, untouched), Ok(()));
        assert_eq!(TracerError::check_internal(ROCTRACER_STATUS_SUCCESS, untouched), Ok(()));

        assert_eq!(
            TracerError::check_unavailable(-1, || Some("callback registration failed".into())),
            Err(TracerError::Unavailable("callback registration failed".to_string()))
        );
        assert_eq!(
            TracerError::check_internal(3, || None),
            Err(TracerError::Internal("<unknown>".to_string()))
        );
    }
}
