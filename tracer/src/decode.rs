//! Decoding of API callback payloads and activity records into trace events
//!
//! Both decoders are pure: they read their inputs, build exactly one
//! [`TraceEvent`] and perform no I/O. Name resolution happens in the caller.
//! The API decoder takes the annotation from its [`CallContext`]; the
//! activity decoder looks it up in the [`AnnotationMap`] it is given.

use crate::annotation::AnnotationMap;
use crate::roctracer::bindings::{
    op, ActivityDomain, ActivityRecord, HipApiData, ACTIVITY_API_PHASE_ENTER,
    ACTIVITY_API_PHASE_EXIT,
};
use hiptrace_shared::{
    CorrelationId, DeviceId, EventKind, EventSource, KernelInfo, MemcpyInfo, ThreadId, Timestamp,
    TraceEvent,
};

/// Phase of an API callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiPhase {
    Enter,
    Exit,
    Unknown(u32),
}

impl From<u32> for ApiPhase {
    fn from(raw: u32) -> Self {
        match raw {
            ACTIVITY_API_PHASE_ENTER => ApiPhase::Enter,
            ACTIVITY_API_PHASE_EXIT => ApiPhase::Exit,
            other => ApiPhase::Unknown(other),
        }
    }
}

/// Arguments of an intercepted call, for the ops the tracer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiArgs {
    KernelLaunch {
        /// `hipFunction_t` handle, 0 if null
        function: usize,
        info: KernelInfo,
    },
    Memcpy {
        bytes: u64,
    },
    MemcpyPeer {
        bytes: u64,
        src_device: DeviceId,
        dst_device: DeviceId,
    },
    Malloc {
        bytes: u64,
    },
    Free,
    Other,
}

/// One API callback, lifted out of the native payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiCallback {
    pub op: u32,
    pub correlation_id: CorrelationId,
    pub phase: ApiPhase,
    pub args: ApiArgs,
}

impl ApiCallback {
    /// Lift a native `hip_api_data_t` payload for `op`.
    ///
    /// # Safety
    ///
    /// `data.args` must hold the union member that the HIP runtime writes for
    /// `op`, and every pointer-sized field read here must be initialized.
    pub unsafe fn from_raw(op: u32, data: &HipApiData) -> Self {
        let args = match op {
            op::HIP_MODULE_LAUNCH_KERNEL => {
                let a = data.args.module_launch_kernel;
                ApiArgs::KernelLaunch {
                    function: a.function as usize,
                    info: KernelInfo {
                        block_x: a.block_dim_x,
                        block_y: a.block_dim_y,
                        block_z: a.block_dim_z,
                        grid_x: a.grid_dim_x,
                        grid_y: a.grid_dim_y,
                        grid_z: a.grid_dim_z,
                        dynamic_shared_memory_bytes: a.shared_mem_bytes,
                    },
                }
            }
            op::HIP_MEMCPY_DTOH | op::HIP_MEMCPY_HTOD | op::HIP_MEMCPY_DTOD => ApiArgs::Memcpy {
                bytes: data.args.memcpy.size_bytes as u64,
            },
            op::HIP_MEMCPY_DTOH_ASYNC | op::HIP_MEMCPY_HTOD_ASYNC | op::HIP_MEMCPY_DTOD_ASYNC => {
                ApiArgs::Memcpy {
                    bytes: data.args.memcpy_async.size_bytes as u64,
                }
            }
            op::HIP_MEMCPY | op::HIP_MEMCPY_ASYNC => ApiArgs::Memcpy {
                bytes: data.args.memcpy_kind.size_bytes as u64,
            },
            op::HIP_MEMCPY_PEER | op::HIP_MEMCPY_PEER_ASYNC => {
                let a = data.args.memcpy_peer;
                ApiArgs::MemcpyPeer {
                    bytes: a.size_bytes as u64,
                    src_device: device_ordinal(a.src_device),
                    dst_device: device_ordinal(a.dst_device),
                }
            }
            op::HIP_MALLOC => ApiArgs::Malloc {
                bytes: data.args.malloc.size as u64,
            },
            op::HIP_FREE => ApiArgs::Free,
            _ => ApiArgs::Other,
        };

        Self {
            op,
            correlation_id: data.correlation_id,
            phase: ApiPhase::from(data.phase),
            args,
        }
    }
}

/// Negative ordinals (invalid device) map to device 0.
fn device_ordinal(raw: i32) -> DeviceId {
    u32::try_from(raw).unwrap_or(0)
}

/// Direction and synchronicity of a memcpy op, from the op ID alone.
pub fn memcpy_kind(op: u32) -> Option<(EventKind, bool)> {
    match op {
        op::HIP_MEMCPY_DTOH => Some((EventKind::MemcpyDeviceToHost, false)),
        op::HIP_MEMCPY_DTOH_ASYNC => Some((EventKind::MemcpyDeviceToHost, true)),
        op::HIP_MEMCPY_HTOD => Some((EventKind::MemcpyHostToDevice, false)),
        op::HIP_MEMCPY_HTOD_ASYNC => Some((EventKind::MemcpyHostToDevice, true)),
        op::HIP_MEMCPY_DTOD => Some((EventKind::MemcpyDeviceToDevice, false)),
        op::HIP_MEMCPY_DTOD_ASYNC => Some((EventKind::MemcpyDeviceToDevice, true)),
        op::HIP_MEMCPY_PEER => Some((EventKind::MemcpyPeerToPeer, false)),
        op::HIP_MEMCPY_PEER_ASYNC => Some((EventKind::MemcpyPeerToPeer, true)),
        op::HIP_MEMCPY => Some((EventKind::MemcpyOther, false)),
        op::HIP_MEMCPY_ASYNC => Some((EventKind::MemcpyOther, true)),
        _ => None,
    }
}

/// `(bytes, kind, async)` for a memcpy op. Unrecognized ops decode to
/// `Unsupported` with zero bytes.
pub fn decode_memcpy(op: u32, bytes: u64) -> (u64, EventKind, bool) {
    match memcpy_kind(op) {
        Some((kind, is_async)) => (bytes, kind, is_async),
        None => (0, EventKind::Unsupported, false),
    }
}

/// Caller-side context for an API event
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub device_id: DeviceId,
    pub thread_id: ThreadId,
    pub start_time_ns: Timestamp,
    pub end_time_ns: Timestamp,
    /// Op name or kernel symbol
    pub name: &'a str,
    pub annotation: &'a str,
}

/// Build the event for an API call observed on the callback path.
///
/// Every call yields one event; ops without a dedicated decoder become
/// `Generic`.
pub fn api_event(call: &ApiCallback, ctx: &CallContext<'_>) -> TraceEvent {
    let source = EventSource::FromApiCallback;
    let mut device_id = ctx.device_id;

    let mut event = match (call.op, call.args) {
        (op::HIP_MODULE_LAUNCH_KERNEL, ApiArgs::KernelLaunch { info, .. }) => {
            TraceEvent::kernel(source, info)
        }
        (op::HIP_MALLOC, ApiArgs::Malloc { bytes }) => TraceEvent::alloc(source, bytes),
        (op::HIP_FREE, _) => TraceEvent::alloc(source, 0),
        (op, args) if memcpy_kind(op).is_some() => {
            let (raw_bytes, destination) = match args {
                ApiArgs::Memcpy { bytes } => (bytes, ctx.device_id),
                ApiArgs::MemcpyPeer {
                    bytes,
                    src_device,
                    dst_device,
                } => {
                    device_id = src_device;
                    (bytes, dst_device)
                }
                _ => (0, ctx.device_id),
            };
            let (num_bytes, kind, is_async) = decode_memcpy(op, raw_bytes);
            TraceEvent::memcpy(
                kind,
                source,
                MemcpyInfo {
                    num_bytes,
                    destination,
                    is_async,
                },
            )
        }
        _ => TraceEvent::new(EventKind::Generic, source),
    };

    event.name = ctx.name.to_string();
    event.start_time_ns = ctx.start_time_ns;
    event.end_time_ns = ctx.end_time_ns;
    event.thread_id = ctx.thread_id;
    event.device_id = device_id;
    event.correlation_id = call.correlation_id;
    event.annotation = ctx.annotation.to_string();
    event
}

/// Build the event for one activity record, with its annotation looked up by
/// `(device_id, correlation_id)`.
///
/// Kernel and memcpy records from the HIP API domain are decoded fully;
/// everything else becomes a `Generic` event whose name the caller fills in.
pub fn activity_event(record: &ActivityRecord, annotations: &AnnotationMap) -> TraceEvent {
    let source = EventSource::FromActivityRecord;
    let device_id = device_ordinal(record.device_id);
    let from_hip_api = record.domain == ActivityDomain::HipApi.as_raw();

    let mut event = match record.op {
        op::HIP_MODULE_LAUNCH_KERNEL if from_hip_api => {
            // Activity records carry no launch configuration.
            TraceEvent::kernel(source, KernelInfo::default())
        }
        op if from_hip_api && memcpy_kind(op).is_some() => {
            let (num_bytes, kind, is_async) = decode_memcpy(op, record.bytes as u64);
            let mut event = TraceEvent::memcpy(
                kind,
                source,
                MemcpyInfo {
                    num_bytes,
                    destination: device_id,
                    is_async,
                },
            );
            event.name = kind.name().to_string();
            event
        }
        _ => TraceEvent::new(EventKind::Generic, source),
    };

    event.start_time_ns = record.begin_ns;
    event.end_time_ns = record.end_ns;
    event.device_id = device_id;
    event.stream_id = record.queue_id;
    event.correlation_id = record.correlation_id;
    if let Some(annotation) = annotations.look_up(device_id, record.correlation_id) {
        event.annotation = annotation.to_string();
    }
    event
}
