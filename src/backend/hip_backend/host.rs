//! Pinned host allocation primitives
//!
//! Thin [`PinnedAllocator`] implementation over hipHostMalloc/hipHostFree.
//! The staging cache owns all bookkeeping; this type only crosses the FFI
//! boundary.

use std::ffi::c_void;
use std::ptr;

use crate::backend::hip_backend::ffi;
use crate::memory::{CacheResult, HostCacheError, PinnedAllocator};

/// hipHostMalloc-backed platform allocator for the staging pool
#[derive(Debug, Clone, Copy, Default)]
pub struct HipHostAllocator;

impl HipHostAllocator {
    pub fn new() -> Self {
        HipHostAllocator
    }
}

impl PinnedAllocator for HipHostAllocator {
    fn alloc_pinned(&self, size: usize) -> CacheResult<*mut c_void> {
        let mut host_ptr: *mut c_void = ptr::null_mut();
        let result =
            unsafe { ffi::hipHostMalloc(&mut host_ptr, size, ffi::HIP_HOST_MALLOC_DEFAULT) };
        if result != ffi::HIP_SUCCESS {
            return Err(HostCacheError::PinnedAllocationFailed(format!(
                "hipHostMalloc of {} bytes failed: {}",
                size,
                ffi::error_string(result)
            )));
        }
        if host_ptr.is_null() {
            return Err(HostCacheError::PinnedAllocationFailed(format!(
                "hipHostMalloc returned null pointer for {} bytes",
                size
            )));
        }
        tracing::debug!("pinned {} bytes of host memory at {:?}", size, host_ptr);
        Ok(host_ptr)
    }

    fn free_pinned(&self, ptr: *mut c_void, size: usize) {
        let result = unsafe { ffi::hipHostFree(ptr) };
        if result != ffi::HIP_SUCCESS {
            // Nothing sane to do with a failed unpin besides report it.
            tracing::error!(
                "hipHostFree of {} bytes at {:?} failed: {}",
                size,
                ptr,
                ffi::error_string(result)
            );
        } else {
            tracing::trace!("unpinned {} bytes of host memory at {:?}", size, ptr);
        }
    }
}
