//! roctracer and HIP runtime FFI
//!
//! [`RoctracerFacility`] implements [`TracingFacility`] on top of
//! `libroctracer64` and `libamdhip64`. The process-wide tracer returned by
//! [`global`] is the one the `extern "C"` trampolines below deliver to.
//!
//! # Safety
//!
//! Every function in the `extern` block is `unsafe`. Pointers passed to them
//! are either null or point to locals that outlive the call; strings returned
//! by the libraries are copied before the next native call.

#![allow(non_snake_case)]

use super::bindings::{
    ActivityDomain, ApiCallbackFn, BufferCallbackFn, RoctracerProperties, RoctracerStatus,
};
use super::facility::TracingFacility;
use crate::error::{Result, TracerError};
use crate::tracer::RocmTracer;
use once_cell::sync::Lazy;
use std::ffi::{c_char, c_int, c_void, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;
use tracing::error;

type HipError = c_int;
const HIP_SUCCESS: HipError = 0;

extern "C" {
    fn roctracer_error_string() -> *const c_char;
    fn roctracer_op_string(domain: u32, op: u32, kind: u32) -> *const c_char;

    fn roctracer_enable_op_callback(
        domain: u32,
        op: u32,
        callback: ApiCallbackFn,
        arg: *mut c_void,
    ) -> RoctracerStatus;
    fn roctracer_enable_domain_callback(
        domain: u32,
        callback: ApiCallbackFn,
        arg: *mut c_void,
    ) -> RoctracerStatus;
    fn roctracer_disable_op_callback(domain: u32, op: u32) -> RoctracerStatus;
    fn roctracer_disable_domain_callback(domain: u32) -> RoctracerStatus;

    fn roctracer_default_pool_expl(pool: *mut c_void) -> *mut c_void;
    fn roctracer_open_pool_expl(
        properties: *const RoctracerProperties,
        pool: *mut *mut c_void,
    ) -> RoctracerStatus;
    fn roctracer_enable_domain_activity_expl(domain: u32, pool: *mut c_void) -> RoctracerStatus;
    fn roctracer_disable_domain_activity(domain: u32) -> RoctracerStatus;
    fn roctracer_flush_activity_expl(pool: *mut c_void) -> RoctracerStatus;
    fn roctracer_next_record(record: *const c_void, next: *mut *const c_void) -> RoctracerStatus;

    fn hipGetDeviceCount(count: *mut c_int) -> HipError;
    fn hipGetDevice(device: *mut c_int) -> HipError;
    fn hipKernelNameRef(function: *const c_void) -> *const c_char;
}

static GLOBAL: Lazy<RocmTracer> = Lazy::new(|| RocmTracer::new(Arc::new(RoctracerFacility)));

/// Process-wide tracer wired to the native callbacks
pub fn global() -> &'static RocmTracer {
    &GLOBAL
}

/// Last roctracer error message on this thread
fn native_error() -> Option<String> {
    // SAFETY: returns a pointer to a thread-local message or null.
    unsafe { owned_string(roctracer_error_string()) }
}

/// Status of a registration, pool or domain enable/disable call
fn check_unavailable(status: RoctracerStatus) -> Result<()> {
    TracerError::check_unavailable(status, native_error)
}

/// Status of an activity flush or record iteration call
fn check_internal(status: RoctracerStatus) -> Result<()> {
    TracerError::check_internal(status, native_error)
}

/// # Safety
///
/// `s` must be null or a valid NUL-terminated string.
unsafe fn owned_string(s: *const c_char) -> Option<String> {
    if s.is_null() {
        None
    } else {
        Some(CStr::from_ptr(s).to_string_lossy().into_owned())
    }
}

/// Tracing facility backed by the ROCm libraries
#[derive(Debug, Default, Clone, Copy)]
pub struct RoctracerFacility;

impl TracingFacility for RoctracerFacility {
    fn device_count(&self) -> u32 {
        let mut count: c_int = 0;
        // SAFETY: `count` outlives the call.
        let status = unsafe { hipGetDeviceCount(&mut count) };
        if status != HIP_SUCCESS {
            error!("hipGetDeviceCount failed with status {}", status);
            return 0;
        }
        u32::try_from(count).unwrap_or(0)
    }

    fn current_device(&self) -> Result<u32> {
        let mut device: c_int = 0;
        // SAFETY: `device` outlives the call.
        let status = unsafe { hipGetDevice(&mut device) };
        if status != HIP_SUCCESS {
            let message = format!("hipGetDevice failed with status {}", status);
            return Err(TracerError::unavailable(Some(&message)));
        }
        u32::try_from(device).map_err(|_| TracerError::internal(Some("negative device ordinal")))
    }

    fn enable_api_callback(&self, domain: ActivityDomain, ops: &[u32]) -> Result<()> {
        // SAFETY: `api_callback` matches `activity_rtapi_callback_t` and
        // stays valid for the life of the process.
        unsafe {
            if ops.is_empty() {
                return check_unavailable(roctracer_enable_domain_callback(
                    domain.as_raw(),
                    api_callback,
                    ptr::null_mut(),
                ));
            }
            for op in ops {
                check_unavailable(roctracer_enable_op_callback(
                    domain.as_raw(),
                    *op,
                    api_callback,
                    ptr::null_mut(),
                ))?;
            }
        }
        Ok(())
    }

    fn disable_api_callback(&self, domain: ActivityDomain, ops: &[u32]) -> Result<()> {
        // SAFETY: plain status-returning calls.
        unsafe {
            if ops.is_empty() {
                return check_unavailable(roctracer_disable_domain_callback(domain.as_raw()));
            }
            for op in ops {
                check_unavailable(roctracer_disable_op_callback(domain.as_raw(), *op))?;
            }
        }
        Ok(())
    }

    fn open_activity_pool(&self, buffer_size: usize) -> Result<()> {
        // SAFETY: a null argument queries the default pool without changing it.
        if !unsafe { roctracer_default_pool_expl(ptr::null_mut()) }.is_null() {
            return Ok(());
        }

        let properties = RoctracerProperties {
            mode: 0,
            buffer_size,
            alloc_fun: ptr::null_mut(),
            alloc_arg: ptr::null_mut(),
            buffer_callback_fun: Some(activity_callback as BufferCallbackFn),
            buffer_callback_arg: ptr::null_mut(),
        };
        // SAFETY: `properties` outlives the call; roctracer copies it.
        check_unavailable(unsafe { roctracer_open_pool_expl(&properties, ptr::null_mut()) })
    }

    fn enable_activity(&self, domain: ActivityDomain) -> Result<()> {
        // SAFETY: a null pool selects the default pool.
        check_unavailable(unsafe {
            roctracer_enable_domain_activity_expl(domain.as_raw(), ptr::null_mut())
        })
    }

    fn disable_activity(&self, domain: ActivityDomain) -> Result<()> {
        // SAFETY: plain status-returning call.
        check_unavailable(unsafe { roctracer_disable_domain_activity(domain.as_raw()) })
    }

    fn flush_activity(&self) -> Result<()> {
        // SAFETY: a null pool selects the default pool.
        check_internal(unsafe { roctracer_flush_activity_expl(ptr::null_mut()) })
    }

    fn next_record(&self, buffer: &[u8], offset: usize) -> Result<usize> {
        if offset >= buffer.len() {
            return Err(TracerError::internal(Some("record offset past end of buffer")));
        }
        let record = buffer[offset..].as_ptr() as *const c_void;
        let mut next: *const c_void = ptr::null();
        // SAFETY: `record` points at a record inside `buffer`; roctracer only
        // computes the address of the following record.
        check_internal(unsafe { roctracer_next_record(record, &mut next) })?;

        let next = (next as usize)
            .checked_sub(buffer.as_ptr() as usize)
            .ok_or_else(|| TracerError::internal(Some("next record precedes buffer")))?;
        if next > buffer.len() {
            return Err(TracerError::internal(Some("next record past end of buffer")));
        }
        Ok(next)
    }

    fn op_name(&self, domain: u32, op: u32, kind: u32) -> String {
        // SAFETY: returns a static string or null.
        unsafe { owned_string(roctracer_op_string(domain, op, kind)) }
            .unwrap_or_else(|| format!("op_{}", op))
    }

    fn kernel_name(&self, function: usize) -> String {
        // SAFETY: `function` is a `hipFunction_t` taken from a launch payload.
        unsafe { owned_string(hipKernelNameRef(function as *const c_void)) }
            .unwrap_or_else(|| "<unknown kernel>".to_string())
    }
}

/// `activity_rtapi_callback_t` trampoline into [`global`]
unsafe extern "C" fn api_callback(domain: u32, op: u32, data: *const c_void, _arg: *mut c_void) {
    // Unwinding into the runtime is undefined behavior.
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: roctracer passes the payload for (domain, op).
        unsafe { global().handle_raw_callback(domain, op, data) }
    }));
    if result.is_err() {
        error!("Panic in HIP API callback for op {}", op);
    }
}

/// `roctracer_buffer_callback_t` trampoline into [`global`]
unsafe extern "C" fn activity_callback(
    begin: *const c_char,
    end: *const c_char,
    _arg: *mut c_void,
) {
    if begin.is_null() || end < begin {
        return;
    }
    let len = end as usize - begin as usize;
    // SAFETY: roctracer guarantees [begin, end) is a readable buffer for the
    // duration of the callback.
    let buffer = unsafe { std::slice::from_raw_parts(begin as *const u8, len) };

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        global().process_activity_buffer(buffer);
    }));
    if result.is_err() {
        error!("Panic while processing activity buffer");
    }
}
