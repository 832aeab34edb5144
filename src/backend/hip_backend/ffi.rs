//! HIP FFI bindings
//!
//! FFI declarations below are bound to the ROCm HIP API. All functions are
//! actively used through the wrapper types in this module. The dead_code
//! allowance is needed because FFI symbols appear unused to the compiler
//! (they are only called through unsafe blocks).

use std::ffi::{c_void, CStr};

#[link(name = "amdhip64")]
#[allow(dead_code)]
extern "C" {
    pub fn hipInit(flags: u32) -> i32;
    pub fn hipGetDeviceCount(count: *mut i32) -> i32;
    pub fn hipSetDevice(deviceId: i32) -> i32;
    pub fn hipHostMalloc(ptr: *mut *mut c_void, size: usize, flags: u32) -> i32;
    pub fn hipHostFree(ptr: *mut c_void) -> i32;
    pub fn hipMalloc(ptr: *mut *mut c_void, size: usize) -> i32;
    pub fn hipFree(ptr: *mut c_void) -> i32;
    pub fn hipMemcpyAsync(
        dst: *mut c_void,
        src: *const c_void,
        count: usize,
        kind: i32,
        stream: *mut c_void,
    ) -> i32;
    pub fn hipStreamCreate(stream: *mut *mut c_void) -> i32;
    pub fn hipStreamDestroy(stream: *mut c_void) -> i32;
    pub fn hipStreamSynchronize(stream: *mut c_void) -> i32;
    pub fn hipEventCreateWithFlags(event: *mut *mut c_void, flags: u32) -> i32;
    pub fn hipEventDestroy(event: *mut c_void) -> i32;
    pub fn hipEventRecord(event: *mut c_void, stream: *mut c_void) -> i32;
    pub fn hipEventQuery(event: *mut c_void) -> i32;
    pub fn hipEventSynchronize(event: *mut c_void) -> i32;
    pub fn hipGetErrorString(error: i32) -> *const i8;
}

/// HIP success code
pub const HIP_SUCCESS: i32 = 0;

/// Returned by hipEventQuery while the captured work is still in flight
pub const HIP_ERROR_NOT_READY: i32 = 600;

/// HIP memory copy kinds
pub const HIP_MEMCPY_HOST_TO_DEVICE: i32 = 1;
pub const HIP_MEMCPY_DEVICE_TO_HOST: i32 = 2;

/// Default hipHostMalloc flags (device-accessible pinned host memory)
pub const HIP_HOST_MALLOC_DEFAULT: u32 = 0x0;

/// Event creation flag that skips timestamp bookkeeping; sync-only events
/// are all the staging pool needs
pub const HIP_EVENT_DISABLE_TIMING: u32 = 0x2;

/// Render a HIP status code through hipGetErrorString.
pub fn error_string(code: i32) -> String {
    unsafe {
        let ptr = hipGetErrorString(code);
        if ptr.is_null() {
            return format!("unknown HIP error {}", code);
        }
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}
