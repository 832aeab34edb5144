//! Common test utilities for GPU staging tests
//!
//! Shared fixture that checks device availability once and lets GPU tests
//! skip gracefully on machines without a ROCm install.

use once_cell::sync::Lazy;

use crate::backend::hip_backend::{self, HipResult, HipStream};

/// Global GPU test fixture, initialized once and shared across tests.
///
/// `None` when no usable device is present; tests return early in that case.
pub static GPU_FIXTURE: Lazy<Option<StagingTestFixture>> = Lazy::new(|| {
    if !hip_backend::gpu_available() {
        eprintln!("WARNING: no ROCm device available - GPU staging tests will be skipped");
        eprintln!("To enable them, ensure an AMD GPU is present and amdhip64 is in LD_LIBRARY_PATH");
        return None;
    }

    match StagingTestFixture::new() {
        Ok(fixture) => {
            eprintln!(
                "GPU staging fixture initialized ({} device(s))",
                fixture.device_count()
            );
            Some(fixture)
        }
        Err(err) => {
            eprintln!("ERROR: failed to initialize GPU staging fixture: {}", err);
            eprintln!("GPU staging tests will be skipped");
            None
        }
    }
});

pub struct StagingTestFixture {
    stream: HipStream,
    device_count: i32,
}

impl StagingTestFixture {
    fn new() -> HipResult<Self> {
        hip_backend::set_device(0)?;
        let stream = HipStream::new()?;
        Ok(Self {
            stream,
            device_count: hip_backend::device_count()?,
        })
    }

    /// Shared stream for staging traffic
    pub fn stream(&self) -> &HipStream {
        &self.stream
    }

    pub fn device_count(&self) -> i32 {
        self.device_count
    }
}
