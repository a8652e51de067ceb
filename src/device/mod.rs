//! Accelerator contract.
//!
//! Device memory and device kernels are provided by an [`Accelerator`]
//! implementation. The tensor layer never touches device memory directly: it
//! holds [`BufferHandle`]s and passes [`DeviceSlice`]s plus shape descriptors
//! to the accelerator, which executes each primitive as one blocking call.
//!
//! Every buffer uses the host layout: flat `f32`, row-major within a plane,
//! planes stored one after another (depth-major). That keeps
//! `to_device`/`to_host` round trips lossless.
//!
//! # Implementations
//!
//! - [`emulated::EmulatedAccelerator`]: software device, always available
//! - `wgpu::WgpuAccelerator`: WGSL compute shaders (feature `wgpu`)

use crate::error::Result;
use crate::ops::activation::Activation;

pub mod emulated;
#[cfg(feature = "wgpu")]
pub mod wgpu;

/// Opaque identifier of an accelerator allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

/// A contiguous run of floats inside a device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSlice {
    /// Allocation the run lives in.
    pub handle: BufferHandle,
    /// First float of the run.
    pub offset: usize,
    /// Number of floats.
    pub len: usize,
}

/// Rows, columns and depth of one operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub rows: usize,
    pub cols: usize,
    pub depth: usize,
}

impl Extent {
    pub const fn new(rows: usize, cols: usize, depth: usize) -> Self {
        Self { rows, cols, depth }
    }

    /// Floats covered by the extent.
    pub const fn size(&self) -> usize {
        self.rows * self.cols * self.depth
    }

    /// Floats in one plane.
    pub const fn plane(&self) -> usize {
        self.rows * self.cols
    }
}

/// Binary arithmetic applied by scalar and element-wise primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mult,
    Div,
}

impl ArithmeticOp {
    #[inline]
    pub fn apply(self, lhs: f32, rhs: f32) -> f32 {
        match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mult => lhs * rhs,
            Self::Div => lhs / rhs,
        }
    }

    #[cfg_attr(not(feature = "wgpu"), allow(dead_code))]
    pub(crate) fn code(self) -> u32 {
        self as u32
    }
}

/// Which operand of a matrix product is read transposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatMulVariant {
    /// `left (m×k) × right (k×n)`
    Plain,
    /// `leftᵗ × right` with `left (k×m)`, `right (k×n)`
    LeftTranspose,
    /// `left × rightᵗ` with `left (m×k)`, `right (n×k)`
    RightTranspose,
}

/// Logical dimensions of a product: the output is `m×n`, the shared axis is `k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatMulDims {
    pub m: usize,
    pub k: usize,
    pub n: usize,
}

/// How input and kernel planes combine in a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvMode {
    /// 2D input, 2D kernel, 2D output.
    Planar,
    /// 3D input and kernel of equal depth, summed over depth into a 2D output.
    Summed,
    /// 3D input, 2D kernel applied to every input plane, 3D output.
    PerInputDepth,
    /// 2D input, every plane of a 3D kernel applied to it, 3D output.
    PerKernelDepth,
}

/// Full description of one convolution call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvSpec {
    pub mode: ConvMode,
    /// Rotate the kernel by 180° (true convolution) instead of cross-correlating.
    pub flip: bool,
    pub input: Extent,
    pub kernel: Extent,
    pub output: Extent,
    pub stride: usize,
    pub padding: usize,
}

/// Non-overlapping window mapping between a fine and a coarse grid.
///
/// For max-pooling the fine side is the input; for upsampling it is the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub fine: Extent,
    pub coarse: Extent,
    pub window_rows: usize,
    pub window_cols: usize,
}

/// Hyper-parameters of one Adam step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamStep {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    /// 1-based step counter used for bias correction.
    pub time_step: u32,
}

/// Device memory and device kernels.
///
/// All calls block until the device has finished. Output slices are written
/// in place; callers guarantee they do not alias any input slice of the same
/// call.
pub trait Accelerator: Send + Sync {
    /// Human-readable backend name.
    fn name(&self) -> &str;

    /// Allocates `len` uninitialised floats.
    fn alloc(&self, len: usize) -> Result<BufferHandle>;
    /// Releases an allocation. Unknown handles are ignored.
    fn dealloc(&self, handle: BufferHandle);
    fn copy_host_to_device(&self, dst: DeviceSlice, src: &[f32]) -> Result<()>;
    fn copy_device_to_host(&self, dst: &mut [f32], src: DeviceSlice) -> Result<()>;
    fn copy_device_to_device(&self, dst: DeviceSlice, src: DeviceSlice) -> Result<()>;
    /// Fills `dst` with `value`.
    fn mem_set(&self, dst: DeviceSlice, value: f32) -> Result<()>;
    /// Fills `dst` with uniform samples from `[min, max)`.
    fn random_uniform(&self, dst: DeviceSlice, min: f32, max: f32, seed: u64) -> Result<()>;

    /// `dst[i] = dst[i] op value`
    fn scalar(&self, op: ArithmeticOp, dst: DeviceSlice, value: f32) -> Result<()>;
    /// `dst[i] = dst[i] op rhs[i]`
    fn element_wise(&self, op: ArithmeticOp, dst: DeviceSlice, rhs: DeviceSlice) -> Result<()>;
    fn activation(&self, activation: Activation, dst: DeviceSlice) -> Result<()>;
    /// Updates `params`, `m` and `v` in place from `grads`.
    fn adam(
        &self,
        step: AdamStep,
        params: DeviceSlice,
        grads: DeviceSlice,
        m: DeviceSlice,
        v: DeviceSlice,
    ) -> Result<()>;

    /// Overwrites `out` with the product selected by `variant`.
    fn matrix_mult(
        &self,
        variant: MatMulVariant,
        dims: MatMulDims,
        left: DeviceSlice,
        right: DeviceSlice,
        out: DeviceSlice,
    ) -> Result<()>;
    /// Adds the convolution result onto `output`.
    fn convolution(
        &self,
        spec: &ConvSpec,
        input: DeviceSlice,
        kernel: DeviceSlice,
        output: DeviceSlice,
    ) -> Result<()>;
    /// Overwrites `output` (coarse) with window maxima of `input` (fine).
    fn max_pool(&self, spec: &WindowSpec, input: DeviceSlice, output: DeviceSlice) -> Result<()>;
    /// Writes each `output` value into `distributed` at its window's argmax in `input`.
    fn distribute_reverse_max_pool(
        &self,
        spec: &WindowSpec,
        distributed: DeviceSlice,
        input: DeviceSlice,
        output: DeviceSlice,
    ) -> Result<()>;
    /// Overwrites `output` (fine) with each `input` (coarse) value broadcast over its window.
    fn nearest_upsample(&self, spec: &WindowSpec, input: DeviceSlice, output: DeviceSlice)
    -> Result<()>;
    /// Overwrites `distributed` (coarse) with window sums of `output` (fine).
    fn distribute_reverse_nearest_upsample(
        &self,
        spec: &WindowSpec,
        distributed: DeviceSlice,
        output: DeviceSlice,
    ) -> Result<()>;
    /// Inverted dropout from `input` into zero-filled `output`; kept positions set `mask` to 1.
    fn dropout(
        &self,
        rate: f32,
        seed: u64,
        input: DeviceSlice,
        output: DeviceSlice,
        mask: Option<DeviceSlice>,
    ) -> Result<()>;
    /// `gradient[i] = -target[i] / prediction[i] / len` where `prediction[i] > 1e-8`, else 0.
    fn cross_entropy_gradient(
        &self,
        prediction: DeviceSlice,
        target: DeviceSlice,
        gradient: DeviceSlice,
    ) -> Result<()>;
}
