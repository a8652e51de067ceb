//! Placement-routed kernel entry points.
//!
//! Every kernel is defined once here and backed by two implementations with
//! the same semantics: the host kernels in [`crate::ops::cpu`], split over the
//! configured [`ExecutionStrategy`], and the matching [`Accelerator`]
//! primitive. The backend is picked from the operands' placement:
//!
//! 1. all operands on host: host kernel
//! 2. all operands on the same accelerator: device primitive
//! 3. anything else: [`Error::PlacementMismatch`]
//!
//! No kernel ever copies between placements; moving data is always an
//! explicit `to_device`/`to_host` by the caller. Device results are allocated
//! on the accelerator that owns the operands.
//!
//! # Example
//! ```rust
//! use ember_ai::ops::Kernels;
//! use ember_ai::tensor2d;
//!
//! let kernels = Kernels::serial();
//! let a = tensor2d!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
//! let b = tensor2d!([[7.0, 8.0], [9.0, 10.0], [11.0, 12.0]]);
//! let c = kernels.matrix_mult(&a, &b).unwrap();
//! assert_eq!(c.to_rows().unwrap(), vec![vec![58.0, 64.0], vec![139.0, 154.0]]);
//! ```

use std::sync::Arc;

use rand::Rng;

use super::cpu;
use super::functions::conv_output_size;
use crate::config::ComputeConfig;
use crate::device::{
    Accelerator, ConvMode, ConvSpec, Extent, MatMulDims, MatMulVariant, WindowSpec,
};
use crate::error::{Error, Result};
use crate::exec::ExecutionStrategy;
use crate::memory::{Buffer, DeviceBuffer, Placement};
use crate::tensors::{Tensor, Tensor2D, Tensor3D};

/// Which implementation a kernel call runs on.
pub(crate) enum Route {
    Host,
    Device(Arc<dyn Accelerator>),
}

impl Route {
    /// Zero-filled packed storage of `len` floats on this route.
    fn zeroed(&self, len: usize) -> Result<Buffer> {
        match self {
            Self::Host => Ok(Buffer::Host(vec![0.0; len])),
            Self::Device(acc) => Ok(Buffer::Device(DeviceBuffer::filled(acc, len, 0.0)?)),
        }
    }

    /// Uninitialised packed storage, for outputs a kernel overwrites entirely.
    fn output(&self, len: usize) -> Result<Buffer> {
        match self {
            Self::Host => Ok(Buffer::Host(vec![0.0; len])),
            Self::Device(acc) => Ok(Buffer::Device(DeviceBuffer::allocate(acc, len)?)),
        }
    }
}

/// Picks the implementation for a call over `operands`.
///
/// # Errors
/// [`Error::PlacementMismatch`] when the operands disagree on placement or
/// live on different accelerators.
pub(crate) fn route(operands: &[&dyn Tensor]) -> Result<Route> {
    let Some((first, rest)) = operands.split_first() else {
        return Ok(Route::Host);
    };
    match first.placement() {
        Placement::Host => {
            if rest.iter().any(|t| t.is_on_device()) {
                return Err(Error::PlacementMismatch);
            }
            Ok(Route::Host)
        }
        Placement::Device => {
            let acc = first.accelerator().ok_or(Error::AcceleratorMissing)?;
            for t in rest {
                if !t.accelerator().is_some_and(|other| same_accelerator(&acc, &other)) {
                    return Err(Error::PlacementMismatch);
                }
            }
            Ok(Route::Device(acc))
        }
    }
}

/// True when both handles point at one accelerator instance.
pub(crate) fn same_accelerator(a: &Arc<dyn Accelerator>, b: &Arc<dyn Accelerator>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Adds packed `values` onto `target` through its layout.
fn accumulate(target: &mut dyn Tensor, values: &[f32]) -> Result<()> {
    let layout = target.layout();
    let data = target.host_data_mut()?;
    for (i, v) in values.iter().enumerate() {
        data[layout.traverse_to(i)] += v;
    }
    Ok(())
}

/// Overwrites `target` with packed `values` through its layout.
fn scatter(target: &mut dyn Tensor, values: &[f32]) -> Result<()> {
    let layout = target.layout();
    let data = target.host_data_mut()?;
    for (i, v) in values.iter().enumerate() {
        data[layout.traverse_to(i)] = *v;
    }
    Ok(())
}

/// Entry point for the dense math kernels.
///
/// Holds the [`ExecutionStrategy`] host kernels run with. Cloning is cheap:
/// parallel strategies share their pool.
#[derive(Debug, Clone, Default)]
pub struct Kernels {
    strategy: ExecutionStrategy,
}

impl Kernels {
    pub fn new(strategy: ExecutionStrategy) -> Self {
        Self { strategy }
    }

    /// Host kernels on the calling thread.
    pub fn serial() -> Self {
        Self::new(ExecutionStrategy::Serial)
    }

    /// Builds the strategy described by `cfg`.
    pub fn from_config(cfg: &ComputeConfig) -> Result<Self> {
        Ok(Self::new(ExecutionStrategy::from_config(cfg)?))
    }

    pub fn strategy(&self) -> &ExecutionStrategy {
        &self.strategy
    }

    /// `left × right`.
    ///
    /// # Requirements
    /// `left.cols == right.rows`
    ///
    /// # Returns
    /// A `left.rows × right.cols` matrix in the operands' placement.
    ///
    /// # Panics
    /// If the inner dimensions differ.
    pub fn matrix_mult(&self, left: &Tensor2D<'_>, right: &Tensor2D<'_>) -> Result<Tensor2D<'static>> {
        assert_eq!(
            left.cols(),
            right.rows(),
            "matrix_mult: {}×{} × {}×{}",
            left.rows(),
            left.cols(),
            right.rows(),
            right.cols()
        );
        let dims = MatMulDims {
            m: left.rows(),
            k: left.cols(),
            n: right.cols(),
        };
        self.product(MatMulVariant::Plain, dims, left, right)
    }

    /// `leftᵗ × right` without materialising the transpose.
    ///
    /// # Requirements
    /// `left.rows == right.rows`
    ///
    /// # Returns
    /// A `left.cols × right.cols` matrix.
    pub fn matrix_mult_left_transpose(
        &self,
        left: &Tensor2D<'_>,
        right: &Tensor2D<'_>,
    ) -> Result<Tensor2D<'static>> {
        assert_eq!(
            left.rows(),
            right.rows(),
            "matrix_mult_left_transpose: ({}×{})ᵗ × {}×{}",
            left.rows(),
            left.cols(),
            right.rows(),
            right.cols()
        );
        let dims = MatMulDims {
            m: left.cols(),
            k: left.rows(),
            n: right.cols(),
        };
        self.product(MatMulVariant::LeftTranspose, dims, left, right)
    }

    /// `left × rightᵗ` without materialising the transpose.
    ///
    /// # Requirements
    /// `left.cols == right.cols`
    ///
    /// # Returns
    /// A `left.rows × right.rows` matrix.
    pub fn matrix_mult_right_transpose(
        &self,
        left: &Tensor2D<'_>,
        right: &Tensor2D<'_>,
    ) -> Result<Tensor2D<'static>> {
        assert_eq!(
            left.cols(),
            right.cols(),
            "matrix_mult_right_transpose: {}×{} × ({}×{})ᵗ",
            left.rows(),
            left.cols(),
            right.rows(),
            right.cols()
        );
        let dims = MatMulDims {
            m: left.rows(),
            k: left.cols(),
            n: right.rows(),
        };
        self.product(MatMulVariant::RightTranspose, dims, left, right)
    }

    fn product(
        &self,
        variant: MatMulVariant,
        dims: MatMulDims,
        left: &Tensor2D<'_>,
        right: &Tensor2D<'_>,
    ) -> Result<Tensor2D<'static>> {
        let route = route(&[left as &dyn Tensor, right])?;
        let len = dims.m * dims.n;
        let buffer = match route {
            Route::Host => {
                let mut out = vec![0.0; len];
                cpu::matrix_mult(&self.strategy, variant, dims, left.grid()?, right.grid()?, &mut out);
                Buffer::Host(out)
            }
            Route::Device(acc) => {
                let out = DeviceBuffer::allocate(&acc, len)?;
                log::trace!("device {variant:?} product {dims:?} on `{}`", acc.name());
                acc.matrix_mult(
                    variant,
                    dims,
                    left.device_slice()?,
                    right.device_slice()?,
                    out.slice(),
                )?;
                Buffer::Device(out)
            }
        };
        Ok(Tensor2D::from_buffer(dims.m, dims.n, buffer))
    }

    /// Cross-correlates `input` with `kernel` and adds the result onto `output`.
    ///
    /// The rank combination selects the mode:
    ///
    /// | input | kernel | output | |
    /// |---|---|---|---|
    /// | 2D | 2D | 2D | plain |
    /// | 3D | 3D | 2D | per-plane results summed over depth |
    /// | 3D | 2D | 3D | kernel applied to every input plane |
    /// | 2D | 3D | 3D | every kernel plane applied to the input |
    ///
    /// Positions outside the input after padding read as zero. The output is
    /// never cleared, so repeated calls accumulate; zero it first for
    /// overwrite semantics.
    ///
    /// # Panics
    /// On an unsupported rank combination, mismatched depths, or an output
    /// whose size is not `(input - kernel + 2·padding) / stride + 1` per axis.
    pub fn convolution(
        &self,
        output: &mut dyn Tensor,
        input: &dyn Tensor,
        kernel: &dyn Tensor,
        stride: usize,
        padding: usize,
    ) -> Result<()> {
        self.convolve_into(output, input, kernel, stride, padding, false)
    }

    /// Like [`Kernels::convolution`] with the kernel rotated by 180°.
    pub fn convolution_kernel_flip(
        &self,
        output: &mut dyn Tensor,
        input: &dyn Tensor,
        kernel: &dyn Tensor,
        stride: usize,
        padding: usize,
    ) -> Result<()> {
        self.convolve_into(output, input, kernel, stride, padding, true)
    }

    /// Convolution into a fresh zeroed 2D output of the computed size.
    ///
    /// Only the modes with a 2D output apply: 2D over 2D, and 3D over 3D summed.
    pub fn convolve(
        &self,
        input: &dyn Tensor,
        kernel: &dyn Tensor,
        stride: usize,
        padding: usize,
    ) -> Result<Tensor2D<'static>> {
        self.convolve_fresh(input, kernel, stride, padding, false)
    }

    /// [`Kernels::convolve`] with the kernel rotated by 180°.
    pub fn convolve_kernel_flip(
        &self,
        input: &dyn Tensor,
        kernel: &dyn Tensor,
        stride: usize,
        padding: usize,
    ) -> Result<Tensor2D<'static>> {
        self.convolve_fresh(input, kernel, stride, padding, true)
    }

    fn convolve_fresh(
        &self,
        input: &dyn Tensor,
        kernel: &dyn Tensor,
        stride: usize,
        padding: usize,
        flip: bool,
    ) -> Result<Tensor2D<'static>> {
        let rows = conv_output_size(input.extent().rows, kernel.extent().rows, stride, padding);
        let cols = conv_output_size(input.extent().cols, kernel.extent().cols, stride, padding);
        let route = route(&[input, kernel])?;
        let mut output = Tensor2D::from_buffer(rows, cols, route.zeroed(rows * cols)?);
        self.convolve_into(&mut output, input, kernel, stride, padding, flip)?;
        Ok(output)
    }

    fn convolve_into(
        &self,
        output: &mut dyn Tensor,
        input: &dyn Tensor,
        kernel: &dyn Tensor,
        stride: usize,
        padding: usize,
        flip: bool,
    ) -> Result<()> {
        let spec = conv_spec(&*output, input, kernel, stride, padding, flip);
        match route(&[&*output, input, kernel])? {
            Route::Host => {
                let sums = cpu::convolution(&self.strategy, &spec, input.grid()?, kernel.grid()?);
                accumulate(output, &sums)
            }
            Route::Device(acc) => {
                log::trace!("device convolution {:?} on `{}`", spec.mode, acc.name());
                acc.convolution(
                    &spec,
                    input.device_slice()?,
                    kernel.device_slice()?,
                    output.device_target()?,
                )
            }
        }
    }

    /// Maximum of every non-overlapping `pool_rows × pool_cols` window, per plane.
    ///
    /// Ties keep the first maximum in row-major order. Trailing rows and
    /// columns that do not fill a window are ignored.
    ///
    /// # Returns
    /// A `rows / pool_rows × cols / pool_cols × depth` volume.
    pub fn max_pool(
        &self,
        input: &Tensor3D<'_>,
        pool_rows: usize,
        pool_cols: usize,
    ) -> Result<Tensor3D<'static>> {
        let spec = pool_spec(input.extent(), pool_rows, pool_cols);
        let route = route(&[input as &dyn Tensor])?;
        let coarse = spec.coarse;
        let buffer = match &route {
            Route::Host => {
                let mut out = vec![0.0; coarse.size()];
                cpu::max_pool(&self.strategy, &spec, input.grid()?, &mut out);
                Buffer::Host(out)
            }
            Route::Device(acc) => {
                let buffer = route.output(coarse.size())?;
                if let Buffer::Device(out) = &buffer {
                    log::trace!("device max pool {pool_rows}×{pool_cols} on `{}`", acc.name());
                    acc.max_pool(&spec, input.device_slice()?, out.slice())?;
                }
                buffer
            }
        };
        Ok(Tensor3D::from_buffer(coarse.rows, coarse.cols, coarse.depth, buffer))
    }

    /// Routes each `output` value back to its window's maximum in `input`.
    ///
    /// The argmax is found by scanning `input` again with the same tie rule as
    /// [`Kernels::max_pool`]. Only those positions of `distributed` are
    /// written; zero it first.
    ///
    /// # Panics
    /// If `distributed` and `input` differ in shape, or `output` is not the
    /// pooled shape of `input`.
    pub fn distribute_reverse_max_pool(
        &self,
        distributed: &mut Tensor3D<'_>,
        input: &Tensor3D<'_>,
        output: &Tensor3D<'_>,
        pool_rows: usize,
        pool_cols: usize,
    ) -> Result<()> {
        let spec = pool_spec(input.extent(), pool_rows, pool_cols);
        assert_eq!(distributed.extent(), input.extent(), "distributed must match input shape");
        assert_eq!(output.extent(), spec.coarse, "output must have the pooled shape");

        match route(&[&*distributed as &dyn Tensor, input, output])? {
            Route::Host => {
                let writes =
                    cpu::reverse_max_pool(&self.strategy, &spec, input.grid()?, output.grid()?);
                let layout = distributed.layout();
                let data = distributed.host_data_mut()?;
                for ((r, c, d), v) in writes {
                    data[layout.index(r, c, d)] = v;
                }
                Ok(())
            }
            Route::Device(acc) => acc.distribute_reverse_max_pool(
                &spec,
                distributed.device_target()?,
                input.device_slice()?,
                output.device_slice()?,
            ),
        }
    }

    /// Broadcasts every cell into an `up_rows × up_cols` block.
    ///
    /// # Returns
    /// A `rows·up_rows × cols·up_cols × depth` volume.
    pub fn nearest_upsample(
        &self,
        input: &Tensor3D<'_>,
        up_rows: usize,
        up_cols: usize,
    ) -> Result<Tensor3D<'static>> {
        assert!(up_rows > 0 && up_cols > 0, "upsample factors must be positive");
        let coarse = input.extent();
        let spec = WindowSpec {
            fine: Extent::new(coarse.rows * up_rows, coarse.cols * up_cols, coarse.depth),
            coarse,
            window_rows: up_rows,
            window_cols: up_cols,
        };
        let fine = spec.fine;
        let route = route(&[input as &dyn Tensor])?;
        let buffer = match &route {
            Route::Host => {
                let mut out = vec![0.0; fine.size()];
                cpu::nearest_upsample(&self.strategy, &spec, input.grid()?, &mut out);
                Buffer::Host(out)
            }
            Route::Device(acc) => {
                let buffer = route.output(fine.size())?;
                if let Buffer::Device(out) = &buffer {
                    acc.nearest_upsample(&spec, input.device_slice()?, out.slice())?;
                }
                buffer
            }
        };
        Ok(Tensor3D::from_buffer(fine.rows, fine.cols, fine.depth, buffer))
    }

    /// Sets every cell of `distributed` to the sum of its block in `output`.
    ///
    /// # Panics
    /// If `output` is not `distributed` upsampled by `up_rows × up_cols`.
    pub fn distribute_reverse_nearest_upsample(
        &self,
        distributed: &mut Tensor3D<'_>,
        output: &Tensor3D<'_>,
        up_rows: usize,
        up_cols: usize,
    ) -> Result<()> {
        assert!(up_rows > 0 && up_cols > 0, "upsample factors must be positive");
        let coarse = distributed.extent();
        let spec = WindowSpec {
            fine: Extent::new(coarse.rows * up_rows, coarse.cols * up_cols, coarse.depth),
            coarse,
            window_rows: up_rows,
            window_cols: up_cols,
        };
        assert_eq!(output.extent(), spec.fine, "output must have the upsampled shape");

        match route(&[&*distributed as &dyn Tensor, output])? {
            Route::Host => {
                let mut sums = vec![0.0; coarse.size()];
                cpu::reverse_nearest_upsample(&self.strategy, &spec, output.grid()?, &mut sums);
                scatter(distributed, &sums)
            }
            Route::Device(acc) => acc.distribute_reverse_nearest_upsample(
                &spec,
                distributed.device_target()?,
                output.device_slice()?,
            ),
        }
    }

    /// Inverted dropout with a fresh random seed.
    ///
    /// Each element is kept with probability `1 - rate` and scaled by
    /// `1 / (1 - rate)`; dropped elements are zero. When `mask` is given, kept
    /// positions are set to `1.0` in it and the rest are left untouched.
    ///
    /// # Panics
    /// If `rate` is outside `[0, 1)` or the mask shape differs from the input.
    pub fn dropout(
        &self,
        input: &Tensor3D<'_>,
        rate: f32,
        mask: Option<&mut Tensor3D<'_>>,
    ) -> Result<Tensor3D<'static>> {
        self.dropout_seeded(input, rate, rand::rng().random(), mask)
    }

    /// [`Kernels::dropout`] with an explicit seed. Equal seeds give equal masks
    /// for the same strategy and placement.
    pub fn dropout_seeded(
        &self,
        input: &Tensor3D<'_>,
        rate: f32,
        seed: u64,
        mut mask: Option<&mut Tensor3D<'_>>,
    ) -> Result<Tensor3D<'static>> {
        assert!((0.0..1.0).contains(&rate), "dropout rate {rate} outside [0, 1)");
        if let Some(m) = &mask {
            assert_eq!(m.extent(), input.extent(), "dropout mask shape mismatch");
        }

        let route = match &mask {
            Some(m) => route(&[input as &dyn Tensor, &**m])?,
            None => route(&[input as &dyn Tensor])?,
        };
        let extent = input.extent();
        let len = extent.size();
        let scale = 1.0 / (1.0 - rate);

        let buffer = match &route {
            Route::Host => {
                let keep = cpu::keep_mask(&self.strategy, len, rate, seed);
                let grid = input.grid()?;
                let out = keep
                    .iter()
                    .enumerate()
                    .map(|(i, &k)| if k > 0.0 { grid.traversed(i) * scale } else { 0.0 })
                    .collect();
                if let Some(m) = mask.as_deref_mut() {
                    let layout = m.layout();
                    let data = m.host_data_mut()?;
                    for (i, &k) in keep.iter().enumerate() {
                        if k > 0.0 {
                            data[layout.traverse_to(i)] = 1.0;
                        }
                    }
                }
                Buffer::Host(out)
            }
            Route::Device(acc) => {
                let buffer = route.zeroed(len)?;
                if let Buffer::Device(out) = &buffer {
                    let mask_slice = mask.as_deref().map(|m| m.device_target()).transpose()?;
                    log::trace!("device dropout rate {rate} on `{}`", acc.name());
                    acc.dropout(rate, seed, input.device_slice()?, out.slice(), mask_slice)?;
                }
                buffer
            }
        };
        Ok(Tensor3D::from_buffer(extent.rows, extent.cols, extent.depth, buffer))
    }

    /// Dropout whose mask is kept for the backward pass.
    ///
    /// The returned [`DropoutMask`] is the only way to back-propagate through
    /// this call, so forward and backward always agree on which elements were
    /// dropped.
    pub fn dropout_with_mask(
        &self,
        input: &Tensor3D<'_>,
        rate: f32,
    ) -> Result<(Tensor3D<'static>, DropoutMask)> {
        let extent = input.extent();
        let route = route(&[input as &dyn Tensor])?;
        let mut mask = Tensor3D::from_buffer(
            extent.rows,
            extent.cols,
            extent.depth,
            route.zeroed(extent.size())?,
        );
        let out = self.dropout(input, rate, Some(&mut mask))?;
        Ok((out, DropoutMask { mask, rate }))
    }
}

/// The keep mask of one dropout forward pass.
#[derive(Debug)]
pub struct DropoutMask {
    mask: Tensor3D<'static>,
    rate: f32,
}

impl DropoutMask {
    /// `1.0` where the forward pass kept an element, `0.0` elsewhere.
    pub fn mask(&self) -> &Tensor3D<'static> {
        &self.mask
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Gradient with respect to the dropout input: `grad · mask / (1 - rate)`.
    ///
    /// # Panics
    /// If `grad` does not have the mask's shape.
    ///
    /// # Errors
    /// [`Error::PlacementMismatch`] when `grad` and the mask are on different placements.
    pub fn backward(&self, grad: &Tensor3D<'_>) -> Result<Tensor3D<'static>> {
        assert_eq!(grad.extent(), self.mask.extent(), "gradient shape does not match mask");
        let mut out = grad.try_clone()?;
        out.mult(&self.mask)?;
        out.mult_scalar(1.0 / (1.0 - self.rate))?;
        Ok(out)
    }
}

/// Convolution mode and extents from operand ranks and shapes.
fn conv_spec(
    output: &dyn Tensor,
    input: &dyn Tensor,
    kernel: &dyn Tensor,
    stride: usize,
    padding: usize,
    flip: bool,
) -> ConvSpec {
    let (out, inp, ker) = (output.extent(), input.extent(), kernel.extent());
    let mode = match (input.rank(), kernel.rank(), output.rank()) {
        (2, 2, 2) => ConvMode::Planar,
        (3, 3, 2) => {
            assert_eq!(inp.depth, ker.depth, "input and kernel depth must match");
            ConvMode::Summed
        }
        (3, 2, 3) => {
            assert_eq!(out.depth, inp.depth, "output depth must match input depth");
            ConvMode::PerInputDepth
        }
        (2, 3, 3) => {
            assert_eq!(out.depth, ker.depth, "output depth must match kernel depth");
            ConvMode::PerKernelDepth
        }
        (i, k, o) => panic!("unsupported convolution: {i}D input, {k}D kernel, {o}D output"),
    };
    assert_eq!(
        (out.rows, out.cols),
        (
            conv_output_size(inp.rows, ker.rows, stride, padding),
            conv_output_size(inp.cols, ker.cols, stride, padding),
        ),
        "convolution output has the wrong size"
    );
    ConvSpec {
        mode,
        flip,
        input: inp,
        kernel: ker,
        output: out,
        stride,
        padding,
    }
}

fn pool_spec(fine: Extent, pool_rows: usize, pool_cols: usize) -> WindowSpec {
    assert!(pool_rows > 0 && pool_cols > 0, "pool size must be positive");
    WindowSpec {
        fine,
        coarse: Extent::new(fine.rows / pool_rows, fine.cols / pool_cols, fine.depth),
        window_rows: pool_rows,
        window_cols: pool_cols,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tensor2d, tensor3d};

    #[test]
    fn max_pool_of_one_to_sixteen() {
        let input = Tensor3D::from_fn(4, 4, 1, |r, c, _| (r * 4 + c + 1) as f32);
        let pooled = Kernels::serial().max_pool(&input, 2, 2).unwrap();
        assert_eq!(pooled.to_vec().unwrap(), vec![6.0, 8.0, 14.0, 16.0]);
    }

    #[test]
    fn convolution_accumulates() {
        let k = Kernels::serial();
        let input = tensor2d!([[1.0, 2.0], [3.0, 4.0]]);
        let kernel = tensor2d!([[1.0]]);
        let mut out = Tensor2D::filled(2, 2, 1.0);
        k.convolution(&mut out, &input, &kernel, 1, 0).unwrap();
        k.convolution(&mut out, &input, &kernel, 1, 0).unwrap();
        assert_eq!(out.to_vec().unwrap(), vec![3.0, 5.0, 7.0, 9.0]);
    }

    #[test]
    fn summed_convolution_adds_planes() {
        let input = tensor3d!([[[1.0, 2.0], [3.0, 4.0]], [[10.0, 20.0], [30.0, 40.0]]]);
        let kernel = Tensor3D::filled(2, 2, 2, 1.0);
        let out = Kernels::serial().convolve(&input, &kernel, 1, 0).unwrap();
        assert_eq!(out.to_vec().unwrap(), vec![110.0]);
    }

    #[test]
    fn per_kernel_depth_produces_one_plane_per_kernel() {
        let input = tensor2d!([[1.0, 2.0], [3.0, 4.0]]);
        let kernel = tensor3d!([[[1.0]], [[2.0]], [[-1.0]]]);
        let mut out = Tensor3D::new(2, 2, 3);
        Kernels::serial()
            .convolution_kernel_flip(&mut out, &input, &kernel, 1, 0)
            .unwrap();
        assert_eq!(out.view_depth(1).to_vec().unwrap(), vec![2.0, 4.0, 6.0, 8.0]);
        assert_eq!(out.view_depth(2).to_vec().unwrap(), vec![-1.0, -2.0, -3.0, -4.0]);
    }

    #[test]
    #[should_panic(expected = "unsupported convolution")]
    fn rank_combination_is_checked() {
        let input = Tensor3D::new(2, 2, 1);
        let kernel = Tensor3D::new(1, 1, 1);
        let mut out = Tensor3D::new(2, 2, 1);
        let _ = Kernels::serial().convolution(&mut out, &input, &kernel, 1, 0);
    }

    #[test]
    fn reverse_upsample_sums_blocks() {
        let k = Kernels::serial();
        let x = tensor3d!([[[1.0, 2.0]]]);
        let up = k.nearest_upsample(&x, 2, 3).unwrap();
        assert_eq!((up.rows(), up.cols(), up.depth()), (2, 6, 1));
        let mut back = Tensor3D::filled(1, 2, 1, 99.0);
        k.distribute_reverse_nearest_upsample(&mut back, &up, 2, 3).unwrap();
        assert_eq!(back.to_vec().unwrap(), vec![6.0, 12.0]);
    }

    #[test]
    fn dropout_mask_marks_kept_positions() {
        let input = Tensor3D::filled(4, 4, 2, 2.0);
        let (out, mask) = Kernels::serial().dropout_with_mask(&input, 0.5).unwrap();
        let out = out.to_vec().unwrap();
        let keep = mask.mask().to_vec().unwrap();
        for (o, k) in out.iter().zip(&keep) {
            assert_eq!(*o, if *k == 1.0 { 4.0 } else { 0.0 });
        }

        let grad = Tensor3D::filled(4, 4, 2, 1.0);
        let back = mask.backward(&grad).unwrap().to_vec().unwrap();
        for (g, k) in back.iter().zip(&keep) {
            assert_eq!(*g, 2.0 * k);
        }
    }

    #[test]
    #[should_panic(expected = "outside [0, 1)")]
    fn dropout_rate_of_one_is_rejected() {
        let input = Tensor3D::new(1, 1, 1);
        let _ = Kernels::serial().dropout(&input, 1.0, None);
    }
}
