//! Driver API hook strategies
//!
//! A hook decides what happens at API entry and exit. Exactly one hook is
//! active per tracing session; [`for_options`] picks it from the options.

use crate::annotation::AnnotationMap;
use crate::collector::TraceCollector;
use crate::decode::{self, ApiArgs, ApiCallback, CallContext};
use crate::error::Result;
use crate::metrics::TracerMetrics;
use crate::options::TracerOptions;
use crate::roctracer::facility::TracingFacility;
use crate::thread::{cached_thread_id, InternalCallGuard};
use hiptrace_shared::utils::time::system_time_nanos;
use hiptrace_shared::{CorrelationId, DeviceId, EventKind, Timestamp};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

pub trait DriverApiHook: Send + Sync {
    fn on_enter(&self, device_id: DeviceId, domain: u32, call: &ApiCallback) -> Result<()>;

    fn on_exit(&self, device_id: DeviceId, domain: u32, call: &ApiCallback) -> Result<()>;

    /// Drain any state held by the hook. Safe to call more than once.
    fn flush(&self) -> Result<()>;
}

/// Where hooks send callback-path events
#[derive(Clone)]
pub struct EventSink {
    collector: Arc<dyn TraceCollector>,
    annotations: Arc<AnnotationMap>,
    facility: Arc<dyn TracingFacility>,
    metrics: Arc<TracerMetrics>,
}

impl EventSink {
    pub fn new(
        collector: Arc<dyn TraceCollector>,
        annotations: Arc<AnnotationMap>,
        facility: Arc<dyn TracingFacility>,
        metrics: Arc<TracerMetrics>,
    ) -> Self {
        Self {
            collector,
            annotations,
            facility,
            metrics,
        }
    }

    fn call_name(&self, domain: u32, call: &ApiCallback) -> String {
        // Name lookups may call back into the runtime.
        let _guard = InternalCallGuard::new();
        match call.args {
            ApiArgs::KernelLaunch { function, .. } if function != 0 => {
                self.facility.kernel_name(function)
            }
            _ => self.facility.op_name(domain, call.op, 0),
        }
    }

    /// Decode `call` and hand the event to the collector.
    pub fn emit(
        &self,
        device_id: DeviceId,
        domain: u32,
        call: &ApiCallback,
        start_time_ns: Timestamp,
        end_time_ns: Timestamp,
    ) {
        let name = self.call_name(domain, call);
        let annotation = self.annotations.look_up(device_id, call.correlation_id);
        let event = decode::api_event(
            call,
            &CallContext {
                device_id,
                thread_id: cached_thread_id(),
                start_time_ns,
                end_time_ns,
                name: &name,
                annotation: annotation.as_deref().unwrap_or(""),
            },
        );

        if event.kind == EventKind::Unsupported {
            debug!("Unsupported memcpy observed: op {}", call.op);
        } else if event.kind == EventKind::KernelLaunch {
            debug!("HIP kernel launched: {}", event.name);
        }

        self.metrics.record_event(&event);
        self.collector.add_event(event);
    }
}

/// Hook used when the activity API measures device-side work.
///
/// Device timing comes from activity records, so the callback path only
/// emits an event when CPU-side callback events were explicitly requested.
/// Those events carry unknown (0) timestamps.
pub struct ActivityApiHook {
    required_callback_api_events: bool,
    sink: EventSink,
}

impl ActivityApiHook {
    pub fn new(options: &TracerOptions, sink: EventSink) -> Self {
        Self {
            required_callback_api_events: options.required_callback_api_events,
            sink,
        }
    }
}

impl DriverApiHook for ActivityApiHook {
    fn on_enter(&self, _device_id: DeviceId, _domain: u32, _call: &ApiCallback) -> Result<()> {
        Ok(())
    }

    fn on_exit(&self, device_id: DeviceId, domain: u32, call: &ApiCallback) -> Result<()> {
        if !self.required_callback_api_events {
            return Ok(());
        }
        self.sink.emit(device_id, domain, call, 0, 0);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Hook used without the activity API: times each call on the host.
///
/// The entry timestamp is kept per correlation ID until the matching exit.
/// At most `max_pending` calls are tracked; calls beyond that are still
/// reported at exit, with an unknown start time.
pub struct CallbackTimingHook {
    sink: EventSink,
    max_pending: usize,
    pending: Mutex<HashMap<CorrelationId, Timestamp>>,
}

impl CallbackTimingHook {
    pub fn new(options: &TracerOptions, sink: EventSink) -> Self {
        Self {
            sink,
            max_pending: options.max_pending_api_calls,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Calls entered but not yet exited
    pub fn pending_calls(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl DriverApiHook for CallbackTimingHook {
    fn on_enter(&self, _device_id: DeviceId, _domain: u32, call: &ApiCallback) -> Result<()> {
        let now = system_time_nanos();
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.len() < self.max_pending {
            pending.insert(call.correlation_id, now);
        } else {
            debug!(
                "Pending call table full ({} entries); correlation {} untimed",
                self.max_pending, call.correlation_id
            );
        }
        Ok(())
    }

    fn on_exit(&self, device_id: DeviceId, domain: u32, call: &ApiCallback) -> Result<()> {
        let end = system_time_nanos();
        let start = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&call.correlation_id);
        // An unknown start makes the whole interval unknown.
        let (start, end) = match start {
            Some(start) => (start, end.max(start)),
            None => (0, 0),
        };
        self.sink.emit(device_id, domain, call, start, end);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !pending.is_empty() {
            info!("Discarding {} API calls that never exited", pending.len());
            pending.clear();
        }
        Ok(())
    }
}

/// Hook for a session configured by `options`
pub fn for_options(options: &TracerOptions, sink: EventSink) -> Box<dyn DriverApiHook> {
    if options.enable_activity_api {
        Box::new(ActivityApiHook::new(options, sink))
    } else {
        Box::new(CallbackTimingHook::new(options, sink))
    }
}
