//! Host staging memory management
//!
//! Pinned (page-locked) host memory is what the asynchronous HIP copy
//! engines want on the host side of a transfer, and locking pages is slow
//! enough that allocating per transfer would dominate small-copy latency.
//! This module caches pinned blocks for the lifetime of the process: freed
//! blocks go into a size-ordered free list instead of back to the driver,
//! and blocks with in-flight device work are quarantined until their
//! completion markers drain.

pub mod host_cache;
pub mod testing;

pub use host_cache::{
    CacheResult, CacheStats, CompletionMarker, HostCacheError, HostMemoryCache, PinnedAllocator,
};

#[cfg(feature = "rocm")]
use crate::backend::hip_backend::{HipEvent, HipHostAllocator};
#[cfg(feature = "rocm")]
use once_cell::sync::Lazy;

#[cfg(feature = "rocm")]
static STAGING_POOL: Lazy<HostMemoryCache<HipHostAllocator, HipEvent>> =
    Lazy::new(|| HostMemoryCache::new(HipHostAllocator::new()));

/// Process-wide pinned staging pool.
///
/// One pool per process: every caller that stages host to device transfers
/// shares the same cache, so a block released by one execution context is
/// reusable by any other. Constructed lazily on first use. Rust statics are
/// never dropped, so the cached pages are reclaimed by the OS at process
/// exit; [`HostMemoryCache::purge_all`] is the explicit relief valve before
/// that.
///
/// Tests that need isolation construct their own [`HostMemoryCache`] over a
/// mock platform instead of going through this accessor.
#[cfg(feature = "rocm")]
pub fn staging_pool() -> &'static HostMemoryCache<HipHostAllocator, HipEvent> {
    &STAGING_POOL
}
