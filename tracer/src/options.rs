//! Tracer configuration

use crate::roctracer::bindings::{op, ActivityDomain};
use hiptrace_shared::utils::{parse_flag, parse_size};
use serde::{Deserialize, Serialize};

/// HIP API ops traced by default: kernel launches, copies and allocations.
pub const DEFAULT_OPS: &[u32] = &[
    op::HIP_MODULE_LAUNCH_KERNEL,
    op::HIP_MEMCPY_DTOH,
    op::HIP_MEMCPY_DTOH_ASYNC,
    op::HIP_MEMCPY_HTOD,
    op::HIP_MEMCPY_HTOD_ASYNC,
    op::HIP_MEMCPY_DTOD,
    op::HIP_MEMCPY_DTOD_ASYNC,
    op::HIP_MEMCPY_PEER,
    op::HIP_MEMCPY_PEER_ASYNC,
    op::HIP_MEMCPY,
    op::HIP_MEMCPY_ASYNC,
    op::HIP_MALLOC,
    op::HIP_FREE,
];

/// Options for one tracing session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerOptions {
    /// Measure device-side work with the activity API
    pub enable_activity_api: bool,

    /// Also emit CPU-side callback events while the activity API is on
    pub required_callback_api_events: bool,

    /// Distinct annotation strings kept per device
    pub max_annotation_strings: usize,

    /// HIP API ops to trace on the callback path (empty = all)
    pub ops_selected: Vec<u32>,

    /// Activity domains to enable
    pub activities_selected: Vec<ActivityDomain>,

    /// Size in bytes of each native activity buffer
    pub activity_buffer_size: usize,

    /// Ask the runtime for the current device on each callback instead of
    /// attributing every call to device 0
    pub resolve_device_id: bool,

    /// Calls tracked between entry and exit when timing on the host
    pub max_pending_api_calls: usize,
}

impl Default for TracerOptions {
    fn default() -> Self {
        Self {
            enable_activity_api: std::env::var("HIPTRACE_ENABLE_ACTIVITY")
                .ok()
                .and_then(|s| parse_flag(&s))
                .unwrap_or(true),
            required_callback_api_events: std::env::var("HIPTRACE_CALLBACK_EVENTS")
                .ok()
                .and_then(|s| parse_flag(&s))
                .unwrap_or(false),
            max_annotation_strings: std::env::var("HIPTRACE_MAX_ANNOTATIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024 * 1024),
            ops_selected: DEFAULT_OPS.to_vec(),
            activities_selected: vec![ActivityDomain::HipApi],
            activity_buffer_size: std::env::var("HIPTRACE_ACTIVITY_BUFFER_SIZE")
                .ok()
                .and_then(|s| parse_size(&s).ok())
                .unwrap_or(0x1000),
            resolve_device_id: false,
            max_pending_api_calls: 64 * 1024,
        }
    }
}

impl TracerOptions {
    /// Whether the callback path traces `op`
    pub fn selects_op(&self, op: u32) -> bool {
        self.ops_selected.is_empty() || self.ops_selected.contains(&op)
    }

    /// Validate options
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_annotation_strings == 0 {
            anyhow::bail!("Annotation capacity must be greater than 0");
        }

        if self.enable_activity_api && self.activity_buffer_size == 0 {
            anyhow::bail!("Activity buffer size must be greater than 0");
        }

        if !self.enable_activity_api && self.max_pending_api_calls == 0 {
            anyhow::bail!("Pending call limit must be greater than 0 without the activity API");
        }

        Ok(())
    }
}
