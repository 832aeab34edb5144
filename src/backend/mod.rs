//! Device backend module
//!
//! Everything here links against amdhip64 and is gated behind the `rocm`
//! feature; the staging cache core builds without it.

#[cfg(feature = "rocm")]
pub mod gpu_test_common;
#[cfg(feature = "rocm")]
pub mod hip_backend;

#[cfg(feature = "rocm")]
pub use hip_backend::*;
