//! HIP stream wrapper

use std::ptr;

use crate::backend::hip_backend::error::{HipError, HipResult};
use crate::backend::hip_backend::ffi;

// SAFETY: HipStream is Send+Sync because it only contains a raw pointer
// and the HIP runtime allows a stream handle to be used from any thread.
// NOTE: HipStream does NOT implement Clone because cloning raw pointers
// would cause double-free when both instances are dropped.
unsafe impl Send for HipStream {}
unsafe impl Sync for HipStream {}

/// HIP stream wrapper
#[derive(Debug)]
pub struct HipStream {
    stream: *mut std::ffi::c_void,
}

impl HipStream {
    /// Create a new HIP stream.
    pub fn new() -> HipResult<Self> {
        let mut stream: *mut std::ffi::c_void = ptr::null_mut();
        let result = unsafe { ffi::hipStreamCreate(&mut stream) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(format!(
                "hipStreamCreate failed: {}",
                ffi::error_string(result)
            )));
        }
        if stream.is_null() {
            return Err(HipError::DeviceError(
                "hipStreamCreate returned null pointer".to_string(),
            ));
        }
        tracing::debug!("HipStream::new: created stream {:?}", stream);
        Ok(HipStream { stream })
    }

    /// Block the host until all work queued on this stream has finished.
    pub fn synchronize(&self) -> HipResult<()> {
        let result = unsafe { ffi::hipStreamSynchronize(self.stream) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(format!(
                "hipStreamSynchronize failed: {}",
                ffi::error_string(result)
            )));
        }
        Ok(())
    }

    /// Get raw stream pointer (for FFI calls)
    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.stream
    }
}

impl Drop for HipStream {
    fn drop(&mut self) {
        if !self.stream.is_null() {
            tracing::trace!("HipStream::drop: destroying stream {:?}", self.stream);
            unsafe {
                ffi::hipStreamDestroy(self.stream);
            }
        }
    }
}
