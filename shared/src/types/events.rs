//! Event type definitions for GPU trace data
//!
//! These types represent one normalized traced GPU operation, independent of
//! whether it was produced by the API-callback path or reconstructed from a
//! device activity record.

use serde::{Deserialize, Serialize};

/// Timestamp in nanoseconds. `0` means the time is unknown.
pub type Timestamp = u64;

/// Host thread ID
pub type ThreadId = u32;

/// GPU device ordinal
pub type DeviceId = u32;

/// Submission queue / stream ID
pub type StreamId = u64;

/// Correlation ID assigned by the runtime, unique per API invocation
pub type CorrelationId = u64;

/// Kind of traced operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    KernelLaunch,
    MemcpyHostToDevice,
    MemcpyDeviceToHost,
    MemcpyDeviceToDevice,
    MemcpyPeerToPeer,
    MemcpyOther,
    MemoryAlloc,
    Generic,
    Unsupported,
}

impl EventKind {
    /// Short display name used by trace viewers
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::KernelLaunch => "Compute",
            EventKind::MemcpyHostToDevice => "MemcpyH2D",
            EventKind::MemcpyDeviceToHost => "MemcpyD2H",
            EventKind::MemcpyDeviceToDevice => "MemcpyD2D",
            EventKind::MemcpyPeerToPeer => "MemcpyP2P",
            EventKind::MemcpyOther => "MemcpyOther",
            EventKind::MemoryAlloc => "MemoryAlloc",
            EventKind::Generic => "Generic",
            EventKind::Unsupported => "Unsupported",
        }
    }

    /// Whether this kind carries a memcpy payload
    pub fn is_memcpy(&self) -> bool {
        matches!(
            self,
            EventKind::MemcpyHostToDevice
                | EventKind::MemcpyDeviceToHost
                | EventKind::MemcpyDeviceToDevice
                | EventKind::MemcpyPeerToPeer
                | EventKind::MemcpyOther
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which path produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventSource {
    FromApiCallback,
    FromActivityRecord,
}

/// Kernel launch configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelInfo {
    pub block_x: u32,
    pub block_y: u32,
    pub block_z: u32,
    pub grid_x: u32,
    pub grid_y: u32,
    pub grid_z: u32,
    pub dynamic_shared_memory_bytes: u32,
}

/// Memory copy details
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemcpyInfo {
    pub num_bytes: u64,
    /// Destination device ordinal
    pub destination: DeviceId,
    pub is_async: bool,
}

/// Allocation details. `num_bytes == 0` denotes a free.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemAllocInfo {
    pub num_bytes: u64,
}

/// Kind-specific payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    Kernel(KernelInfo),
    Memcpy(MemcpyInfo),
    Alloc(MemAllocInfo),
    None,
}

/// One normalized GPU trace record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub kind: EventKind,
    pub source: EventSource,

    /// Operation name or kernel symbol (empty if unavailable)
    pub name: String,

    pub start_time_ns: Timestamp,
    pub end_time_ns: Timestamp,

    pub thread_id: ThreadId,
    pub device_id: DeviceId,
    pub stream_id: StreamId,
    pub correlation_id: CorrelationId,

    /// Annotation active when the API call was made (may be empty)
    #[serde(default)]
    pub annotation: String,

    pub payload: EventPayload,
}

impl TraceEvent {
    /// Create an event with the payload that matches `kind`, zero-valued.
    pub fn new(kind: EventKind, source: EventSource) -> Self {
        let payload = match kind {
            EventKind::KernelLaunch => EventPayload::Kernel(KernelInfo::default()),
            EventKind::MemoryAlloc => EventPayload::Alloc(MemAllocInfo::default()),
            k if k.is_memcpy() => EventPayload::Memcpy(MemcpyInfo::default()),
            _ => EventPayload::None,
        };

        Self {
            kind,
            source,
            name: String::new(),
            start_time_ns: 0,
            end_time_ns: 0,
            thread_id: 0,
            device_id: 0,
            stream_id: 0,
            correlation_id: 0,
            annotation: String::new(),
            payload,
        }
    }

    /// Kernel launch event
    pub fn kernel(source: EventSource, info: KernelInfo) -> Self {
        Self {
            payload: EventPayload::Kernel(info),
            ..Self::new(EventKind::KernelLaunch, source)
        }
    }

    /// Memcpy event. `kind` must be one of the memcpy kinds or `Unsupported`;
    /// an `Unsupported` copy carries a zero-valued memcpy payload.
    pub fn memcpy(kind: EventKind, source: EventSource, info: MemcpyInfo) -> Self {
        let mut event = Self::new(kind, source);
        event.payload = match kind {
            EventKind::Unsupported => EventPayload::Memcpy(MemcpyInfo::default()),
            k if k.is_memcpy() => EventPayload::Memcpy(info),
            _ => event.payload,
        };
        event
    }

    /// Allocation event (`num_bytes == 0` for a free)
    pub fn alloc(source: EventSource, num_bytes: u64) -> Self {
        Self {
            payload: EventPayload::Alloc(MemAllocInfo { num_bytes }),
            ..Self::new(EventKind::MemoryAlloc, source)
        }
    }

    /// Both timestamps are known. Events failing this are excluded from time
    /// normalization downstream.
    pub fn has_timestamps(&self) -> bool {
        self.start_time_ns != 0 && self.end_time_ns != 0
    }

    /// Duration in nanoseconds, if both timestamps are known
    pub fn duration_ns(&self) -> Option<u64> {
        if self.has_timestamps() {
            self.end_time_ns.checked_sub(self.start_time_ns)
        } else {
            None
        }
    }

    /// Kind and payload agree, and the interval is not inverted.
    pub fn is_consistent(&self) -> bool {
        let payload_ok = match (&self.kind, &self.payload) {
            (EventKind::KernelLaunch, EventPayload::Kernel(_)) => true,
            (EventKind::MemoryAlloc, EventPayload::Alloc(_)) => true,
            (k, EventPayload::Memcpy(_)) if k.is_memcpy() => true,
            (EventKind::Unsupported, EventPayload::Memcpy(m)) => m.num_bytes == 0,
            (EventKind::Generic | EventKind::Unsupported, EventPayload::None) => true,
            _ => false,
        };
        let times_ok = !self.has_timestamps() || self.end_time_ns >= self.start_time_ns;
        payload_ok && times_ok
    }

    /// Memcpy payload, if any
    pub fn memcpy_info(&self) -> Option<&MemcpyInfo> {
        match &self.payload {
            EventPayload::Memcpy(m) => Some(m),
            _ => None,
        }
    }

    /// Kernel payload, if any
    pub fn kernel_info(&self) -> Option<&KernelInfo> {
        match &self.payload {
            EventPayload::Kernel(k) => Some(k),
            _ => None,
        }
    }

    /// Allocation payload, if any
    pub fn alloc_info(&self) -> Option<&MemAllocInfo> {
        match &self.payload {
            EventPayload::Alloc(a) => Some(a),
            _ => None,
        }
    }
}
