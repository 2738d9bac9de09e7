//! Tracer lifecycle and callback dispatch
//!
//! [`RocmTracer`] owns one tracing session at a time. `enable` builds the
//! session (annotation registry, hook, collector) and registers with the
//! native facility; `disable` tears it down again. Native callbacks arrive on
//! arbitrary runtime threads through [`RocmTracer::handle_callback`] and
//! [`RocmTracer::process_activity_buffer`].

use crate::annotation::{AnnotationMap, AnnotationSource, ThreadAnnotations};
use crate::collector::TraceCollector;
use crate::decode::{self, ApiCallback, ApiPhase};
use crate::hook::{self, DriverApiHook, EventSink};
use crate::metrics::TracerMetrics;
use crate::options::TracerOptions;
use crate::roctracer::bindings::{ActivityDomain, ActivityRecord, HipApiData};
use crate::roctracer::facility::TracingFacility;
use crate::thread::InternalCallGuard;
use hiptrace_shared::{CorrelationId, DeviceId, EventKind};
use once_cell::sync::OnceCell;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, error, info, trace, warn};

/// State that only exists while tracing is enabled
struct Session {
    options: TracerOptions,
    collector: Arc<dyn TraceCollector>,
    annotations: Arc<AnnotationMap>,
    hook: Box<dyn DriverApiHook>,
}

pub struct RocmTracer {
    facility: Arc<dyn TracingFacility>,
    annotation_source: Arc<dyn AnnotationSource>,
    api_tracing_enabled: AtomicBool,
    activity_tracing_enabled: AtomicBool,
    /// Serializes enable and disable
    lifecycle: Mutex<()>,
    session: RwLock<Option<Session>>,
    num_gpus: OnceCell<u32>,
    metrics: Arc<TracerMetrics>,
}

impl RocmTracer {
    /// Create a disabled tracer that reads annotations from
    /// [`ScopedAnnotation`](crate::annotation::ScopedAnnotation) scopes.
    pub fn new(facility: Arc<dyn TracingFacility>) -> Self {
        Self::with_annotation_source(facility, Arc::new(ThreadAnnotations))
    }

    pub fn with_annotation_source(
        facility: Arc<dyn TracingFacility>,
        annotation_source: Arc<dyn AnnotationSource>,
    ) -> Self {
        Self {
            facility,
            annotation_source,
            api_tracing_enabled: AtomicBool::new(false),
            activity_tracing_enabled: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            session: RwLock::new(None),
            num_gpus: OnceCell::new(),
            metrics: Arc::new(TracerMetrics::new()),
        }
    }

    /// Whether a session can be started: a GPU is visible and the tracer is
    /// idle
    pub fn is_available(&self) -> bool {
        self.num_gpus() > 0 && !self.session_is_active()
    }

    /// Number of visible GPUs, queried once
    pub fn num_gpus(&self) -> u32 {
        *self.num_gpus.get_or_init(|| {
            let _guard = InternalCallGuard::new();
            let count = self.facility.device_count();
            debug!("Found {} HIP devices", count);
            count
        })
    }

    pub fn is_api_tracing_enabled(&self) -> bool {
        self.api_tracing_enabled.load(Ordering::Acquire)
    }

    pub fn is_activity_tracing_enabled(&self) -> bool {
        self.activity_tracing_enabled.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> &TracerMetrics {
        &self.metrics
    }

    /// Start a tracing session delivering events to `collector`.
    ///
    /// Does nothing if a session is already running or `options` are
    /// invalid. Native registration failures are logged and leave the
    /// affected path disabled.
    pub fn enable(&self, options: TracerOptions, collector: Arc<dyn TraceCollector>) {
        let _lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);

        if self.session_is_active() {
            warn!("Tracer already enabled; ignoring enable request");
            return;
        }

        if let Err(e) = options.validate() {
            error!("Invalid tracer options: {:#}", e);
            return;
        }

        let num_gpus = self.num_gpus();
        let annotations = Arc::new(AnnotationMap::new(options.max_annotation_strings, num_gpus));
        let sink = EventSink::new(
            collector.clone(),
            annotations.clone(),
            self.facility.clone(),
            self.metrics.clone(),
        );
        let hook = hook::for_options(&options, sink);

        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(Session {
            options: options.clone(),
            collector,
            annotations,
            hook,
        });

        // The session lock is released before touching the facility: native
        // calls may synchronously deliver callbacks that need it.
        self.enable_api_tracing(&options);
        if options.enable_activity_api {
            self.enable_activity_tracing(&options);
        }

        info!(
            "Tracer enabled: {} GPUs, api={} activity={}",
            num_gpus,
            self.is_api_tracing_enabled(),
            self.is_activity_tracing_enabled()
        );
    }

    /// Stop the current session, draining buffered records and flushing the
    /// hook and collector. Safe to call when already disabled.
    pub fn disable(&self) {
        let _lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);

        let options = match self
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(session) => session.options.clone(),
            None => {
                debug!("Tracer already disabled");
                return;
            }
        };

        if self.is_api_tracing_enabled() {
            self.disable_api_tracing(&options);
        }
        if self.is_activity_tracing_enabled() {
            // Records flushed here are still accepted into the session.
            self.disable_activity_tracing(&options);
        }

        let session = self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(session) = session {
            if let Err(e) = session.hook.flush() {
                error!("Failed to flush driver hook: {}", e);
            }
            session.collector.flush();
        }

        info!("Tracer disabled");
    }

    /// Entry point for a raw native API callback.
    ///
    /// # Safety
    ///
    /// When `domain` is the HIP API domain, `data` must be null or point to a
    /// `hip_api_data_t` valid for the duration of the call whose argument
    /// union matches `op`.
    pub unsafe fn handle_raw_callback(&self, domain: u32, op: u32, data: *const c_void) {
        if !self.is_api_tracing_enabled() || domain != ActivityDomain::HipApi.as_raw() {
            return;
        }
        let Some(data) = (data as *const HipApiData).as_ref() else {
            debug!("Null callback data for op {}", op);
            return;
        };
        self.handle_callback(domain, ApiCallback::from_raw(op, data));
    }

    /// Dispatch one decoded API callback to the session's hook.
    pub fn handle_callback(&self, domain: u32, call: ApiCallback) {
        if !self.is_api_tracing_enabled() {
            return;
        }
        if domain != ActivityDomain::HipApi.as_raw() {
            trace!("Ignoring callback from domain {}", domain);
            return;
        }
        if InternalCallGuard::is_active() {
            return;
        }

        let session = self.session.read().unwrap_or_else(PoisonError::into_inner);
        let Some(session) = session.as_ref() else {
            return;
        };
        if !session.options.selects_op(call.op) {
            return;
        }

        let device_id = self.callback_device(&session.options);
        let result = match call.phase {
            ApiPhase::Enter => session.hook.on_enter(device_id, domain, &call),
            ApiPhase::Exit => {
                // Must be registered before the event is decoded.
                let annotation = self.annotation_source.current_annotation();
                if !annotation.is_empty() {
                    let annotations = &session.annotations;
                    let known_device = (device_id as usize) < annotations.num_devices();
                    if !annotations.add(device_id, call.correlation_id, &annotation) {
                        if known_device {
                            self.metrics.annotation_dropped();
                        } else {
                            trace!("No annotation registry for device {}", device_id);
                        }
                    }
                }
                session.hook.on_exit(device_id, domain, &call)
            }
            ApiPhase::Unknown(phase) => {
                debug!("Ignoring callback with unknown phase {}", phase);
                return;
            }
        };

        if let Err(e) = result {
            self.metrics.callback_error();
            debug!(
                "Driver hook failed for op {} (correlation {}): {}",
                call.op, call.correlation_id, e
            );
        }
    }

    /// Decode a buffer of native activity records and hand the events to the
    /// collector.
    pub fn process_activity_buffer(&self, buffer: &[u8]) {
        if !self.is_activity_tracing_enabled() {
            self.reject_activity_buffer(buffer.len());
            return;
        }

        let session = self.session.read().unwrap_or_else(PoisonError::into_inner);
        let Some(session) = session.as_ref() else {
            self.reject_activity_buffer(buffer.len());
            return;
        };

        let mut offset = 0;
        let mut emitted = 0usize;
        while offset < buffer.len() {
            let Some(record) = ActivityRecord::read_from(&buffer[offset..]) else {
                self.metrics.record_dropped();
                debug!(
                    "Dropping {} trailing bytes of activity buffer",
                    buffer.len() - offset
                );
                break;
            };

            let mut event = decode::activity_event(&record, &session.annotations);
            if event.kind == EventKind::Generic {
                let _guard = InternalCallGuard::new();
                event.name = self.facility.op_name(record.domain, record.op, record.kind);
            }
            trace!(
                "Activity record: {} correlation {} [{}, {}]",
                event.name,
                event.correlation_id,
                event.start_time_ns,
                event.end_time_ns
            );
            self.metrics.record_event(&event);
            session.collector.add_event(event);
            emitted += 1;

            match self.facility.next_record(buffer, offset) {
                Ok(next) if next > offset => offset = next,
                Ok(next) => {
                    error!("Activity record iteration stalled at offset {}", next);
                    break;
                }
                Err(e) => {
                    error!("Aborting activity buffer after {} records: {}", emitted, e);
                    break;
                }
            }
        }

        debug!("Processed {} activity records", emitted);
    }

    /// Annotation registered for `correlation_id` on `device_id` in the
    /// current session
    pub fn look_up_annotation(
        &self,
        device_id: DeviceId,
        correlation_id: CorrelationId,
    ) -> Option<Arc<str>> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|session| session.annotations.look_up(device_id, correlation_id))
    }

    fn session_is_active(&self) -> bool {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Device a callback is attributed to
    fn callback_device(&self, options: &TracerOptions) -> DeviceId {
        if !options.resolve_device_id {
            return 0;
        }
        let _guard = InternalCallGuard::new();
        self.facility.current_device().unwrap_or_else(|e| {
            debug!("Could not resolve current device: {}", e);
            0
        })
    }

    fn reject_activity_buffer(&self, len: usize) {
        self.metrics.buffer_discarded();
        warn!(
            "Discarding {} byte activity buffer delivered while activity tracing is disabled",
            len
        );
    }

    fn enable_api_tracing(&self, options: &TracerOptions) {
        let _guard = InternalCallGuard::new();
        self.api_tracing_enabled.store(true, Ordering::Release);

        match self
            .facility
            .enable_api_callback(ActivityDomain::HipApi, &options.ops_selected)
        {
            Ok(()) if options.ops_selected.is_empty() => {
                debug!("Enabled callbacks for all HIP API ops");
            }
            Ok(()) => debug!("Enabled callbacks for {} HIP API ops", options.ops_selected.len()),
            Err(e) => {
                error!("Failed to enable HIP API callbacks: {}", e);
                self.api_tracing_enabled.store(false, Ordering::Release);
            }
        }
    }

    fn enable_activity_tracing(&self, options: &TracerOptions) {
        let _guard = InternalCallGuard::new();

        if let Err(e) = self.facility.open_activity_pool(options.activity_buffer_size) {
            error!("Failed to open activity pool: {}", e);
            return;
        }

        // Set before enabling domains so the first buffers are accepted.
        self.activity_tracing_enabled.store(true, Ordering::Release);

        let mut enabled = 0;
        for domain in &options.activities_selected {
            match self.facility.enable_activity(*domain) {
                Ok(()) => {
                    debug!("Enabled activity domain {:?}", domain);
                    enabled += 1;
                }
                Err(e) => error!("Failed to enable activity domain {:?}: {}", domain, e),
            }
        }

        if enabled == 0 {
            warn!("No activity domain could be enabled");
            self.activity_tracing_enabled.store(false, Ordering::Release);
        }
    }

    fn disable_api_tracing(&self, options: &TracerOptions) {
        let _guard = InternalCallGuard::new();
        if let Err(e) = self
            .facility
            .disable_api_callback(ActivityDomain::HipApi, &options.ops_selected)
        {
            error!("Failed to disable HIP API callbacks: {}", e);
        }
        self.api_tracing_enabled.store(false, Ordering::Release);
    }

    fn disable_activity_tracing(&self, options: &TracerOptions) {
        let _guard = InternalCallGuard::new();
        for domain in &options.activities_selected {
            if let Err(e) = self.facility.disable_activity(*domain) {
                error!("Failed to disable activity domain {:?}: {}", domain, e);
            }
        }
        if let Err(e) = self.facility.flush_activity() {
            error!("Failed to flush activity records: {}", e);
        }
        self.activity_tracing_enabled.store(false, Ordering::Release);
    }
}
