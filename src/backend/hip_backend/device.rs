//! Device availability probes

use crate::backend::hip_backend::error::{HipError, HipResult};
use crate::backend::hip_backend::ffi;

/// Number of HIP devices visible to this process.
pub fn device_count() -> HipResult<i32> {
    let mut count: i32 = 0;
    let result = unsafe { ffi::hipGetDeviceCount(&mut count) };
    if result != ffi::HIP_SUCCESS {
        return Err(HipError::InitializationFailed(format!(
            "hipGetDeviceCount failed: {}",
            ffi::error_string(result)
        )));
    }
    Ok(count)
}

/// Whether at least one usable ROCm device is present.
///
/// Probe errors count as no device; tests use this to skip gracefully on
/// machines without a GPU.
pub fn gpu_available() -> bool {
    device_count().map(|count| count > 0).unwrap_or(false)
}

/// Select the active device for the calling thread.
pub fn set_device(device_id: i32) -> HipResult<()> {
    let result = unsafe { ffi::hipSetDevice(device_id) };
    if result != ffi::HIP_SUCCESS {
        return Err(HipError::DeviceError(format!(
            "hipSetDevice({}) failed: {}",
            device_id,
            ffi::error_string(result)
        )));
    }
    Ok(())
}
