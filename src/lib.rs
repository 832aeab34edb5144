//! StageForge - pinned host-memory staging pool for AMD GPUs
//!
//! A caching allocator for the pinned (page-locked) host memory that stages
//! host to device transfers in a ROCm/HIP runtime. Page-locking is an
//! expensive driver round trip, so freed blocks are cached in a size-ordered
//! free list and reused instead of being returned to the OS. Blocks with
//! in-flight asynchronous device work are tracked through opaque completion
//! markers (HIP events) and quarantined until that work is known finished.
//!
//! The cache core is platform-agnostic behind two trait seams
//! ([`PinnedAllocator`] and [`CompletionMarker`]); the HIP implementations
//! and the process-wide [`memory::staging_pool`] live behind the `rocm`
//! feature.

pub mod backend;
pub mod error;
pub mod logging;
pub mod memory;

pub use error::{ErrorCategory, StageForgeError, StageResult};
pub use logging::{init_logging_default, init_logging_from_env, LoggingConfig};
pub use memory::{
    CacheStats, CompletionMarker, HostCacheError, HostMemoryCache, PinnedAllocator,
};

#[cfg(feature = "rocm")]
pub use backend::hip_backend::{
    DeviceBuffer, HipError, HipEvent, HipHostAllocator, HipResult, HipStream,
};
#[cfg(feature = "rocm")]
pub use memory::staging_pool;
