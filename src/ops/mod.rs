//! # Kernel Layer
//!
//! Dense math over [`Tensor2D`]/[`Tensor3D`], routed by placement.
//!
//! ## Submodules
//!
//! - [`dispatch`]: [`Kernels`], the entry point for every kernel
//! - [`cpu`]: host implementations, serial or split over a worker pool
//! - [`activation`]: in-place activation maps
//! - [`loss`]: loss gradients
//! - [`optim`]: SGD and Adam update primitives
//! - [`functions`]: sums, transposes, random tensors, convolution sizing
//!
//! ## Adding a kernel
//!
//! 1. Implement the host version in `cpu` against [`Grid`] inputs
//! 2. Add the matching primitive to [`Accelerator`]
//! 3. Expose it on [`Kernels`], with shape checks before routing
//!
//! [`Tensor2D`]: crate::tensors::Tensor2D
//! [`Tensor3D`]: crate::tensors::Tensor3D
//! [`Grid`]: crate::tensors::Grid
//! [`Accelerator`]: crate::device::Accelerator

pub mod activation;
pub mod cpu;
pub mod dispatch;
pub mod functions;
pub mod loss;
pub mod optim;

pub use dispatch::{DropoutMask, Kernels};
