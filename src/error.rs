//! Unified error handling for stageforge
//!
//! Consolidates the module-level errors (staging cache, HIP backend,
//! logging) into one type with coarse categorization: user errors
//! (actionable by the caller), backend errors (driver and device
//! conditions), and internal errors (bugs).

use thiserror::Error;

use crate::logging::LoggingError;
use crate::memory::HostCacheError;

/// Unified error type for stageforge
#[derive(Debug, Error)]
pub enum StageForgeError {
    /// Staging cache error (zero-size request, pinned allocation failure)
    #[error("host staging cache error: {0}")]
    Cache(#[from] HostCacheError),

    /// HIP backend error
    #[cfg(feature = "rocm")]
    #[error("HIP error: {0}")]
    Hip(#[from] crate::backend::hip_backend::HipError),

    /// Logging setup error
    #[error("logging setup error: {0}")]
    Logging(#[from] LoggingError),
}

/// Unified result type for stageforge
pub type StageResult<T> = Result<T, StageForgeError>;

/// Coarse error categories for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Recoverable or actionable by the caller
    User,
    /// Driver or device condition
    Backend,
    /// Bug in this crate or its caller
    Internal,
}

impl StageForgeError {
    /// Categorize this error for reporting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            StageForgeError::Cache(HostCacheError::ZeroSizeRequest) => ErrorCategory::User,
            StageForgeError::Cache(HostCacheError::PinnedAllocationFailed(_)) => {
                ErrorCategory::Backend
            }
            StageForgeError::Cache(HostCacheError::LockPoisoned(_)) => ErrorCategory::Internal,
            #[cfg(feature = "rocm")]
            StageForgeError::Hip(_) => ErrorCategory::Backend,
            StageForgeError::Logging(_) => ErrorCategory::User,
        }
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// Pinned allocation failures may clear once other pools release memory
    /// or the caller purges this one; everything else is permanent.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StageForgeError::Cache(HostCacheError::PinnedAllocationFailed(_))
        )
    }
}
