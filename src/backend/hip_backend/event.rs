//! HIP event wrapper used as the staging pool's completion marker
//!
//! An event recorded on a stream after an asynchronous copy captures that
//! copy's completion. The staging cache polls events with the non-blocking
//! [`HipEvent::query`]; nothing in the pool ever waits on one.

use std::ptr;

use crate::backend::hip_backend::error::{HipError, HipResult};
use crate::backend::hip_backend::ffi;
use crate::backend::hip_backend::stream::HipStream;
use crate::memory::CompletionMarker;

// SAFETY: HipEvent is Send+Sync because it only contains a raw pointer
// and the HIP runtime allows an event handle to be queried from any thread.
// NOTE: HipEvent does NOT implement Clone because cloning raw pointers
// would cause double-free when both instances are dropped.
unsafe impl Send for HipEvent {}
unsafe impl Sync for HipEvent {}

/// HIP event wrapper
///
/// Created with timing disabled: the pool only cares whether captured work
/// has finished, never how long it took.
#[derive(Debug)]
pub struct HipEvent {
    event: *mut std::ffi::c_void,
}

impl HipEvent {
    /// Create a new sync-only HIP event.
    pub fn new() -> HipResult<Self> {
        let mut event: *mut std::ffi::c_void = ptr::null_mut();
        let result =
            unsafe { ffi::hipEventCreateWithFlags(&mut event, ffi::HIP_EVENT_DISABLE_TIMING) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(format!(
                "hipEventCreateWithFlags failed: {}",
                ffi::error_string(result)
            )));
        }
        if event.is_null() {
            return Err(HipError::DeviceError(
                "hipEventCreateWithFlags returned null pointer".to_string(),
            ));
        }
        tracing::trace!("HipEvent::new: created event {:?}", event);
        Ok(HipEvent { event })
    }

    /// Record this event in the given stream.
    ///
    /// The event captures all work submitted to the stream before this call;
    /// it completes once that work has finished.
    pub fn record(&self, stream: &HipStream) -> HipResult<()> {
        let result = unsafe { ffi::hipEventRecord(self.event, stream.as_ptr()) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(format!(
                "hipEventRecord failed: {}",
                ffi::error_string(result)
            )));
        }
        Ok(())
    }

    /// Non-blocking completion probe.
    ///
    /// Returns `Ok(true)` once the captured work has finished, `Ok(false)`
    /// while it is still in flight.
    pub fn query(&self) -> HipResult<bool> {
        let result = unsafe { ffi::hipEventQuery(self.event) };
        match result {
            ffi::HIP_SUCCESS => Ok(true),
            ffi::HIP_ERROR_NOT_READY => Ok(false),
            other => Err(HipError::DeviceError(format!(
                "hipEventQuery failed: {}",
                ffi::error_string(other)
            ))),
        }
    }

    /// Block the host until the captured work has finished.
    pub fn synchronize(&self) -> HipResult<()> {
        let result = unsafe { ffi::hipEventSynchronize(self.event) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(format!(
                "hipEventSynchronize failed: {}",
                ffi::error_string(result)
            )));
        }
        Ok(())
    }

    /// Get raw event pointer (for FFI calls)
    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.event
    }
}

impl CompletionMarker for HipEvent {
    fn is_complete(&self) -> bool {
        match self.query() {
            Ok(done) => done,
            // A failing query keeps the block quarantined; a stalled device
            // is fatal far outside this pool's remit.
            Err(err) => {
                tracing::warn!("hipEventQuery failed, treating marker as pending: {}", err);
                false
            }
        }
    }
}

impl Drop for HipEvent {
    fn drop(&mut self) {
        if !self.event.is_null() {
            tracing::trace!("HipEvent::drop: destroying event {:?}", self.event);
            unsafe {
                ffi::hipEventDestroy(self.event);
            }
        }
    }
}
