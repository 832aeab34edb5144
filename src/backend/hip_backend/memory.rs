//! Device buffer wrapper for staging test traffic
//!
//! The staging pool itself manages host memory only. This minimal device
//! buffer is the collaborator the end-to-end tests stage into.

use std::ptr;

use crate::backend::hip_backend::error::{HipError, HipResult};
use crate::backend::hip_backend::ffi;
use crate::backend::hip_backend::stream::HipStream;

// SAFETY: DeviceBuffer is Send+Sync because it only contains a raw device
// pointer; the HIP runtime allows the handle to be used from any thread.
unsafe impl Send for DeviceBuffer {}
unsafe impl Sync for DeviceBuffer {}

/// Owned device allocation (hipMalloc / hipFree)
#[derive(Debug)]
pub struct DeviceBuffer {
    ptr: *mut std::ffi::c_void,
    size: usize,
}

impl DeviceBuffer {
    /// Allocate `size` bytes of device memory.
    pub fn new(size: usize) -> HipResult<Self> {
        if size == 0 {
            return Err(HipError::MemoryAllocationFailed(
                "device buffer size cannot be zero".to_string(),
            ));
        }
        let mut ptr: *mut std::ffi::c_void = ptr::null_mut();
        let result = unsafe { ffi::hipMalloc(&mut ptr, size) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::MemoryAllocationFailed(format!(
                "hipMalloc of {} bytes failed: {}",
                size,
                ffi::error_string(result)
            )));
        }
        if ptr.is_null() {
            return Err(HipError::MemoryAllocationFailed(format!(
                "hipMalloc returned null pointer for {} bytes",
                size
            )));
        }
        tracing::debug!("DeviceBuffer::new: allocated {} bytes at {:?}", size, ptr);
        Ok(DeviceBuffer { ptr, size })
    }

    /// Buffer size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get raw device pointer (for FFI calls)
    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.ptr
    }

    /// Queue an asynchronous copy from pinned host memory into this buffer.
    ///
    /// # Safety
    ///
    /// `src` must point to at least `len` bytes of pinned host memory that
    /// stays valid until the copy is observed complete (record an event on
    /// `stream` and hand it to the staging pool via `record_usage`).
    pub unsafe fn copy_from_pinned_async(
        &self,
        src: *const std::ffi::c_void,
        len: usize,
        stream: &HipStream,
    ) -> HipResult<()> {
        if len > self.size {
            return Err(HipError::MemoryCopyFailed(format!(
                "copy of {} bytes exceeds device buffer of {} bytes",
                len, self.size
            )));
        }
        let result = ffi::hipMemcpyAsync(
            self.ptr,
            src,
            len,
            ffi::HIP_MEMCPY_HOST_TO_DEVICE,
            stream.as_ptr(),
        );
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::MemoryCopyFailed(format!(
                "hipMemcpyAsync of {} bytes failed: {}",
                len,
                ffi::error_string(result)
            )));
        }
        Ok(())
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            tracing::trace!("DeviceBuffer::drop: freeing {} bytes at {:?}", self.size, self.ptr);
            unsafe {
                ffi::hipFree(self.ptr);
            }
        }
    }
}
