//! Host kernels.
//!
//! Every kernel reads its operands through [`Grid`]s, so strided watchers
//! are handled by the same code as packed tensors, and writes densely packed
//! results that the caller scatters back through the output's layout. Work is
//! split over the output's primary axis by an [`ExecutionStrategy`]:
//!
//! - matrix products: output rows
//! - 2D convolution outputs: output rows
//! - 3D convolution outputs, pooling, upsampling: output planes
//! - dropout: the flattened element index
//!
//! The emulated accelerator runs these same kernels serially, which keeps
//! host and device results numerically aligned.
//!
//! [`Grid`]: crate::tensors::Grid
//! [`ExecutionStrategy`]: crate::exec::ExecutionStrategy

use crate::device::Extent;

mod conv;
pub use self::conv::convolution;

mod dropout;
pub use self::dropout::keep_mask;

mod matmul;
pub use self::matmul::matrix_mult;

mod pool;
pub use self::pool::{max_pool, reverse_max_pool};

mod upsample;
pub use self::upsample::{nearest_upsample, reverse_nearest_upsample};

/// `(row, col, depth)` of the `flat`-th element of a packed extent.
#[inline]
fn unravel(extent: Extent, flat: usize) -> (usize, usize, usize) {
    let plane = extent.plane();
    let rem = flat % plane;
    (rem / extent.cols, rem % extent.cols, flat / plane)
}
