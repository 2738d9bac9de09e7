//! roctracer and HIP FFI layouts
//!
//! Only the parts of `roctracer.h` / `hip_prof_str.h` the tracer decodes are
//! mirrored here. Structs are `#[repr(C)]` so a pointer handed to a native
//! callback can be reinterpreted directly.

use serde::{Deserialize, Serialize};
use std::ffi::{c_char, c_void};

pub type RoctracerStatus = i32;

pub const ROCTRACER_STATUS_SUCCESS: RoctracerStatus = 0;

/// Callback phase for API calls
pub const ACTIVITY_API_PHASE_ENTER: u32 = 0;
pub const ACTIVITY_API_PHASE_EXIT: u32 = 1;

/// roctracer activity domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ActivityDomain {
    HsaApi = 0,
    HsaOps = 1,
    HipOps = 2,
    HipApi = 3,
    KfdApi = 4,
    ExtApi = 5,
    Roctx = 6,
}

impl ActivityDomain {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(ActivityDomain::HsaApi),
            1 => Some(ActivityDomain::HsaOps),
            2 => Some(ActivityDomain::HipOps),
            3 => Some(ActivityDomain::HipApi),
            4 => Some(ActivityDomain::KfdApi),
            5 => Some(ActivityDomain::ExtApi),
            6 => Some(ActivityDomain::Roctx),
            _ => None,
        }
    }

    pub const fn as_raw(self) -> u32 {
        self as u32
    }
}

impl std::str::FromStr for ActivityDomain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hsa_api" => Ok(ActivityDomain::HsaApi),
            "hsa_ops" => Ok(ActivityDomain::HsaOps),
            "hip_ops" => Ok(ActivityDomain::HipOps),
            "hip_api" => Ok(ActivityDomain::HipApi),
            "kfd_api" => Ok(ActivityDomain::KfdApi),
            "ext_api" => Ok(ActivityDomain::ExtApi),
            "roctx" => Ok(ActivityDomain::Roctx),
            _ => anyhow::bail!("Invalid activity domain: {}", s),
        }
    }
}

/// HIP API operation IDs (`hip_api_id_t`) for the calls the tracer decodes.
pub mod op {
    pub const HIP_MALLOC: u32 = 3;
    pub const HIP_MEMCPY_DTOH: u32 = 12;
    pub const HIP_MEMCPY_HTOD: u32 = 20;
    pub const HIP_MEMCPY_DTOD: u32 = 26;
    pub const HIP_MEMCPY: u32 = 39;
    pub const HIP_MEMCPY_PEER: u32 = 44;
    pub const HIP_FREE: u32 = 56;
    pub const HIP_MEMCPY_DTOH_ASYNC: u32 = 71;
    pub const HIP_MEMCPY_ASYNC: u32 = 79;
    pub const HIP_MODULE_LAUNCH_KERNEL: u32 = 84;
    pub const HIP_MEMCPY_PEER_ASYNC: u32 = 93;
    pub const HIP_MEMCPY_HTOD_ASYNC: u32 = 107;
    pub const HIP_MEMCPY_DTOD_ASYNC: u32 = 120;
}

/// Arguments of `hipMemcpy{DtoH,HtoD,DtoD}`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MemcpyArgs {
    pub dst: *mut c_void,
    pub src: *const c_void,
    pub size_bytes: usize,
}

/// Arguments of `hipMemcpy{DtoH,HtoD,DtoD}Async`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MemcpyAsyncArgs {
    pub dst: *mut c_void,
    pub src: *const c_void,
    pub size_bytes: usize,
    pub stream: *mut c_void,
}

/// Arguments of `hipMemcpy` / `hipMemcpyAsync`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MemcpyKindArgs {
    pub dst: *mut c_void,
    pub src: *const c_void,
    pub size_bytes: usize,
    pub kind: u32,
    pub stream: *mut c_void,
}

/// Arguments of `hipMemcpyPeer` / `hipMemcpyPeerAsync`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MemcpyPeerArgs {
    pub dst: *mut c_void,
    pub dst_device: i32,
    pub src: *const c_void,
    pub src_device: i32,
    pub size_bytes: usize,
    pub stream: *mut c_void,
}

/// Arguments of `hipMalloc`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MallocArgs {
    pub ptr: *mut *mut c_void,
    pub size: usize,
}

/// Arguments of `hipFree`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FreeArgs {
    pub ptr: *mut c_void,
}

/// Arguments of `hipModuleLaunchKernel`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ModuleLaunchKernelArgs {
    pub function: *mut c_void,
    pub grid_dim_x: u32,
    pub grid_dim_y: u32,
    pub grid_dim_z: u32,
    pub block_dim_x: u32,
    pub block_dim_y: u32,
    pub block_dim_z: u32,
    pub shared_mem_bytes: u32,
    pub stream: *mut c_void,
    pub kernel_params: *mut *mut c_void,
    pub extra: *mut *mut c_void,
}

/// Per-op argument union. Which field is valid is determined by the op ID.
#[repr(C)]
#[derive(Clone, Copy)]
pub union HipApiArgs {
    pub memcpy: MemcpyArgs,
    pub memcpy_async: MemcpyAsyncArgs,
    pub memcpy_kind: MemcpyKindArgs,
    pub memcpy_peer: MemcpyPeerArgs,
    pub malloc: MallocArgs,
    pub free: FreeArgs,
    pub module_launch_kernel: ModuleLaunchKernelArgs,
}

/// Leading fields of `hip_api_data_t`, the payload of a HIP API callback.
///
/// The native struct carries a larger union and trailing fields; this is a
/// layout-compatible prefix and must only be read through a pointer, never
/// copied out of native memory by value.
#[repr(C)]
pub struct HipApiData {
    pub correlation_id: u64,
    pub phase: u32,
    pub args: HipApiArgs,
}

/// `roctracer_record_t`: one record in an activity buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityRecord {
    pub domain: u32,
    pub kind: u32,
    pub op: u32,
    pub correlation_id: u64,
    pub begin_ns: u64,
    pub end_ns: u64,
    pub device_id: i32,
    pub queue_id: u64,
    pub bytes: usize,
}

impl ActivityRecord {
    pub const SIZE: usize = std::mem::size_of::<ActivityRecord>();

    /// Read a record from the start of `bytes`, if enough bytes remain.
    pub fn read_from(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        // SAFETY: length checked above; the record is plain old data and the
        // unaligned read tolerates any buffer alignment.
        Some(unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const ActivityRecord) })
    }
}

/// Native API callback signature (`activity_rtapi_callback_t`)
pub type ApiCallbackFn =
    unsafe extern "C" fn(domain: u32, op: u32, callback_data: *const c_void, arg: *mut c_void);

/// Native activity buffer callback signature (`roctracer_buffer_callback_t`)
pub type BufferCallbackFn =
    unsafe extern "C" fn(begin: *const c_char, end: *const c_char, arg: *mut c_void);

/// `roctracer_properties_t`
#[repr(C)]
pub struct RoctracerProperties {
    pub mode: u32,
    pub buffer_size: usize,
    pub alloc_fun: *mut c_void,
    pub alloc_arg: *mut c_void,
    pub buffer_callback_fun: Option<BufferCallbackFn>,
    pub buffer_callback_arg: *mut c_void,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_activity_record_layout() {
        assert_eq!(ActivityRecord::SIZE, 64);
        assert_eq!(std::mem::offset_of!(ActivityRecord, correlation_id), 16);
        assert_eq!(std::mem::offset_of!(ActivityRecord, device_id), 40);
        assert_eq!(std::mem::offset_of!(ActivityRecord, bytes), 56);
    }

    #[test]
    fn test_read_from_short_buffer() {
        assert!(ActivityRecord::read_from(&[0u8; 10]).is_none());
    }

    #[test]
    fn test_domain_round_trip() {
        for raw in 0..7 {
            assert_eq!(ActivityDomain::from_raw(raw).unwrap().as_raw(), raw);
        }
        assert_eq!(ActivityDomain::from_raw(99), None);
        assert_eq!("hip_api".parse::<ActivityDomain>().unwrap(), ActivityDomain::HipApi);
        assert!("cuda".parse::<ActivityDomain>().is_err());
    }
}
