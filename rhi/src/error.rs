//! RHI error types.

use std::fmt;

/// Errors that can occur in the render hardware interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RhiError {
    /// Failed to initialize a backend or device.
    InitializationFailed(String),
    /// Failed to create a native object.
    ResourceCreationFailed(String),
    /// A requested feature is not supported.
    FeatureNotSupported(String),
    /// No memory type satisfies the request, or the device ran out of memory.
    OutOfMemory,
    /// A bounded wait expired before the GPU finished.
    Timeout,
    /// The GPU device was lost.
    DeviceLost,
    /// A fixed-capacity pool has no idle objects left.
    PoolExhausted,
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// An internal error occurred.
    Internal(String),
}

impl fmt::Display for RhiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializationFailed(msg) => write!(f, "initialization failed: {msg}"),
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::FeatureNotSupported(msg) => write!(f, "feature not supported: {msg}"),
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::Timeout => write!(f, "timed out waiting for the GPU"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::PoolExhausted => write!(f, "object pool exhausted"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for RhiError {}

/// Convenience alias used throughout the crate.
pub type RhiResult<T> = Result<T, RhiError>;
