//! ROCm/HIP backend for the staging pool
//!
//! Raw bindings plus RAII wrappers for the handful of HIP objects the pool
//! touches: pinned host allocations, streams, completion events, and the
//! device buffers the end-to-end tests stage into.

pub mod ffi;

mod device;
mod error;
mod event;
mod host;
mod memory;
mod stream;

pub use device::{device_count, gpu_available, set_device};
pub use error::{HipError, HipResult};
pub use event::HipEvent;
pub use host::HipHostAllocator;
pub use memory::DeviceBuffer;
pub use stream::HipStream;
