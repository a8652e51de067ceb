//! ember_ai: tensor and execution core for neural-network training.
//!
//! Provides dense `f32` matrices and volumes that either own their storage or
//! watch a slice of another tensor, the kernels a convolutional network is
//! built from, and transparent dispatch of those kernels to the host or to an
//! accelerator.
//!
//! # Features
//!
//! - Rank-2 and rank-3 tensors with zero-copy watcher views: depth slices,
//!   depth ranges and strided sub-windows.
//! - Matrix products (plain and with either operand transposed),
//!   convolution with and without kernel flip, max-pooling, nearest
//!   upsampling and their gradient-routing reverses, inverted dropout.
//! - Host kernels split over a fixed worker pool with a deterministic
//!   partition of the work.
//! - Device placement behind the [`device::Accelerator`] trait; the
//!   `wgpu` feature adds a WGSL compute backend.
//!
//! # Modules
//!
//! - [`tensors`]: tensor types, watchers and the shared [`Tensor`] trait.
//! - [`ops`]: placement-routed kernels, activations, loss and optimizer steps.
//! - [`exec`]: work partitioning and the host execution strategy.
//! - [`device`]: the accelerator contract and its implementations.
//! - [`backend`]: the process-wide accelerator registry.
//! - [`memory`]: owned and watched storage on host and device.
//! - [`config`]: worker pool configuration.
//! - [`approx`]: float comparison helpers.
//! - [`error`]: the crate error type.
//!
//! # Example
//!
//! ```rust
//! use ember_ai::{tensor3d, Kernels, Tensor};
//!
//! let kernels = Kernels::serial();
//! let input = tensor3d!([[
//!     [1.0, 2.0, 3.0, 4.0],
//!     [5.0, 6.0, 7.0, 8.0],
//!     [9.0, 10.0, 11.0, 12.0],
//!     [13.0, 14.0, 15.0, 16.0],
//! ]]);
//! let pooled = kernels.max_pool(&input, 2, 2).unwrap();
//! assert_eq!(pooled.to_vec().unwrap(), vec![6.0, 8.0, 14.0, 16.0]);
//! ```

pub mod approx;
pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod exec;
pub mod memory;
pub mod ops;
pub mod tensors;

pub use config::ComputeConfig;
pub use error::{Error, Result};
pub use exec::ExecutionStrategy;
pub use memory::Placement;
pub use ops::{DropoutMask, Kernels};
pub use tensors::{Tensor, Tensor2D, Tensor3D, Window};
