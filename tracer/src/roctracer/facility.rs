//! Native tracing facility interface
//!
//! Everything the tracer needs from roctracer and the HIP runtime goes
//! through [`TracingFacility`], so the dispatch and correlation logic can be
//! driven without a GPU.

use super::bindings::{ActivityDomain, ActivityRecord};
use crate::error::{Result, TracerError};

pub trait TracingFacility: Send + Sync {
    /// Number of visible GPUs (0 if the runtime cannot be initialized)
    fn device_count(&self) -> u32;

    /// Device currently selected on the calling thread
    fn current_device(&self) -> Result<u32>;

    /// Register the API callback for `ops` in `domain`, or for every op when
    /// `ops` is empty.
    fn enable_api_callback(&self, domain: ActivityDomain, ops: &[u32]) -> Result<()>;

    /// Undo [`enable_api_callback`](Self::enable_api_callback) for the same
    /// op selection.
    fn disable_api_callback(&self, domain: ActivityDomain, ops: &[u32]) -> Result<()>;

    /// Open the activity pool unless one already exists.
    fn open_activity_pool(&self, buffer_size: usize) -> Result<()>;

    fn enable_activity(&self, domain: ActivityDomain) -> Result<()>;

    fn disable_activity(&self, domain: ActivityDomain) -> Result<()>;

    /// Deliver all buffered activity records to the buffer callback.
    fn flush_activity(&self) -> Result<()>;

    /// Offset of the record following the one at `offset` in `buffer`.
    fn next_record(&self, buffer: &[u8], offset: usize) -> Result<usize> {
        offset
            .checked_add(ActivityRecord::SIZE)
            .filter(|next| *next <= buffer.len())
            .ok_or_else(|| TracerError::internal(Some("record extends past end of buffer")))
    }

    /// Display name of an operation
    fn op_name(&self, domain: u32, op: u32, kind: u32) -> String;

    /// Symbol name of a launched kernel function handle
    fn kernel_name(&self, function: usize) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inert;

    impl TracingFacility for Inert {
        fn device_count(&self) -> u32 {
            1
        }
        fn current_device(&self) -> Result<u32> {
            Ok(0)
        }
        fn enable_api_callback(&self, _: ActivityDomain, _: &[u32]) -> Result<()> {
            Ok(())
        }
        fn disable_api_callback(&self, _: ActivityDomain, _: &[u32]) -> Result<()> {
            Ok(())
        }
        fn open_activity_pool(&self, _: usize) -> Result<()> {
            Ok(())
        }
        fn enable_activity(&self, _: ActivityDomain) -> Result<()> {
            Ok(())
        }
        fn disable_activity(&self, _: ActivityDomain) -> Result<()> {
            Ok(())
        }
        fn flush_activity(&self) -> Result<()> {
            Ok(())
        }
        fn op_name(&self, _: u32, _: u32, _: u32) -> String {
            String::new()
        }
        fn kernel_name(&self, _: usize) -> String {
            String::new()
        }
    }

    #[test]
    fn test_default_next_record_steps_one_record() {
        let buffer = vec![0u8; ActivityRecord::SIZE * 2];
        let facility = Inert;

        assert_eq!(facility.next_record(&buffer, 0).unwrap(), ActivityRecord::SIZE);
        assert_eq!(
            facility.next_record(&buffer, ActivityRecord::SIZE).unwrap(),
            buffer.len()
        );
        assert!(facility.next_record(&buffer, buffer.len()).is_err());
    }
}
