//! Test helpers: an in-process stand-in for roctracer and the HIP runtime

#![allow(dead_code)]

use hiptrace::roctracer::bindings::{ActivityDomain, ActivityRecord};
use hiptrace::{RocmTracer, TracerError, TracingFacility};
use std::mem::offset_of;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

/// A native call the tracer made, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    EnableApiCallback(Vec<u32>),
    DisableApiCallback(Vec<u32>),
    OpenActivityPool(usize),
    EnableActivity(ActivityDomain),
    DisableActivity(ActivityDomain),
    FlushActivity,
}

/// Records every call and delivers queued activity buffers on flush, the way
/// roctracer invokes the buffer callback.
#[derive(Default)]
pub struct FakeFacility {
    pub devices: u32,
    calls: Mutex<Vec<Call>>,
    pending_buffers: Mutex<Vec<Vec<u8>>>,
    tracer: OnceLock<Weak<RocmTracer>>,
    pub fail_api_callback: AtomicBool,
    pub fail_activity_pool: AtomicBool,
    /// Fail `next_record` after this many successful steps
    pub fail_next_record_after: Mutex<Option<usize>>,
    next_record_steps: AtomicUsize,
}

impl FakeFacility {
    pub fn new(devices: u32) -> Self {
        Self {
            devices,
            ..Default::default()
        }
    }

    /// Route flushed buffers to `tracer`
    pub fn attach(&self, tracer: &Arc<RocmTracer>) {
        let _ = self.tracer.set(Arc::downgrade(tracer));
    }

    /// Queue a buffer for delivery at the next flush
    pub fn queue_buffer(&self, buffer: Vec<u8>) {
        self.pending_buffers.lock().unwrap().push(buffer);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl TracingFacility for FakeFacility {
    fn device_count(&self) -> u32 {
        self.devices
    }

    fn current_device(&self) -> hiptrace::Result<u32> {
        Ok(self.devices.saturating_sub(1))
    }

    fn enable_api_callback(&self, domain: ActivityDomain, ops: &[u32]) -> hiptrace::Result<()> {
        assert_eq!(domain, ActivityDomain::HipApi);
        if self.fail_api_callback.load(Ordering::SeqCst) {
            return Err(TracerError::unavailable(Some("callback registration refused")));
        }
        self.record(Call::EnableApiCallback(ops.to_vec()));
        Ok(())
    }

    fn disable_api_callback(&self, _domain: ActivityDomain, ops: &[u32]) -> hiptrace::Result<()> {
        self.record(Call::DisableApiCallback(ops.to_vec()));
        Ok(())
    }

    fn open_activity_pool(&self, buffer_size: usize) -> hiptrace::Result<()> {
        if self.fail_activity_pool.load(Ordering::SeqCst) {
            return Err(TracerError::unavailable(None));
        }
        self.record(Call::OpenActivityPool(buffer_size));
        Ok(())
    }

    fn enable_activity(&self, domain: ActivityDomain) -> hiptrace::Result<()> {
        self.record(Call::EnableActivity(domain));
        Ok(())
    }

    fn disable_activity(&self, domain: ActivityDomain) -> hiptrace::Result<()> {
        self.record(Call::DisableActivity(domain));
        Ok(())
    }

    fn flush_activity(&self) -> hiptrace::Result<()> {
        self.record(Call::FlushActivity);
        let buffers = std::mem::take(&mut *self.pending_buffers.lock().unwrap());
        if let Some(tracer) = self.tracer.get().and_then(Weak::upgrade) {
            for buffer in buffers {
                tracer.process_activity_buffer(&buffer);
            }
        }
        Ok(())
    }

    fn next_record(&self, buffer: &[u8], offset: usize) -> hiptrace::Result<usize> {
        let steps = self.next_record_steps.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = *self.fail_next_record_after.lock().unwrap() {
            if steps >= limit {
                return Err(TracerError::internal(Some("corrupt record")));
            }
        }
        let next = offset + ActivityRecord::SIZE;
        if next > buffer.len() {
            return Err(TracerError::internal(None));
        }
        Ok(next)
    }

    fn op_name(&self, _domain: u32, op: u32, _kind: u32) -> String {
        format!("hip_op_{}", op)
    }

    fn kernel_name(&self, function: usize) -> String {
        format!("kernel_{:#x}", function)
    }
}

/// Serialize records the way roctracer lays them out in a buffer
pub fn records_to_bytes(records: &[ActivityRecord]) -> Vec<u8> {
    fn put(record: &mut [u8], offset: usize, value: &[u8]) {
        record[offset..offset + value.len()].copy_from_slice(value);
    }

    let mut bytes = vec![0u8; records.len() * ActivityRecord::SIZE];
    for (r, out) in records.iter().zip(bytes.chunks_exact_mut(ActivityRecord::SIZE)) {
        put(out, offset_of!(ActivityRecord, domain), &r.domain.to_ne_bytes());
        put(out, offset_of!(ActivityRecord, kind), &r.kind.to_ne_bytes());
        put(out, offset_of!(ActivityRecord, op), &r.op.to_ne_bytes());
        put(out, offset_of!(ActivityRecord, correlation_id), &r.correlation_id.to_ne_bytes());
        put(out, offset_of!(ActivityRecord, begin_ns), &r.begin_ns.to_ne_bytes());
        put(out, offset_of!(ActivityRecord, end_ns), &r.end_ns.to_ne_bytes());
        put(out, offset_of!(ActivityRecord, device_id), &r.device_id.to_ne_bytes());
        put(out, offset_of!(ActivityRecord, queue_id), &r.queue_id.to_ne_bytes());
        put(out, offset_of!(ActivityRecord, bytes), &r.bytes.to_ne_bytes());
    }
    bytes
}

/// A HIP API domain activity record
pub fn hip_record(op: u32, correlation_id: u64, bytes: usize) -> ActivityRecord {
    ActivityRecord {
        domain: ActivityDomain::HipApi.as_raw(),
        op,
        correlation_id,
        begin_ns: 1_000,
        end_ns: 2_500,
        bytes,
        ..Default::default()
    }
}

/// Tracer wired to a fresh fake facility
pub fn tracer_with_facility(devices: u32) -> (Arc<RocmTracer>, Arc<FakeFacility>) {
    let facility = Arc::new(FakeFacility::new(devices));
    let tracer = Arc::new(RocmTracer::new(facility.clone()));
    facility.attach(&tracer);
    (tracer, facility)
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("hiptrace=debug")
        .try_init();
}
