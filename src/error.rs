//! Crate-wide error type.
//!
//! Runtime environment failures (placement mismatches, host-only access on
//! device data, missing accelerator, backend faults) surface as [`Error`].
//! Shape mismatches and out-of-range view parameters are programmer errors
//! and panic through `assert!` instead.

/// Errors reported by tensor operations, kernels and accelerators.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operands of one call live in different placements.
    #[error("tensors are not on the same device")]
    PlacementMismatch,

    /// Raw element access was attempted on device memory.
    #[error("tensor data is on device")]
    DataOnDevice,

    /// A host closure (`map`, `element_wise`, generator) was applied to device memory.
    #[error("device tensors cannot run host closures")]
    HostClosureOnDevice,

    /// `to_device`/`to_host` was called on a watcher.
    #[error("watcher tensors cannot change placement, copy the data first")]
    WatcherPlacement,

    /// A write went through a read-only view.
    #[error("tensor is a read-only view")]
    ReadOnlyWatcher,

    /// A strided view of device memory was handed to the accelerator.
    #[error("strided device views cannot be passed to the accelerator")]
    NonContiguousDevice,

    /// Device memory was requested before an accelerator was installed.
    #[error("no accelerator installed")]
    AcceleratorMissing,

    /// Failure reported by the accelerator backend.
    #[error("device error: {0}")]
    Device(String),

    /// Malformed tensor text.
    #[error("parse error: {0}")]
    Parse(String),

    /// Malformed configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The worker pool could not be built.
    #[error("thread pool error: {0}")]
    ThreadPool(String),
}

impl Error {
    /// Shorthand for an accelerator failure with a message.
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }
}

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Self::ThreadPool(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;
