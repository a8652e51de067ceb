//! Software accelerator.
//!
//! Keeps "device" buffers in a table owned by the accelerator and runs every
//! primitive with the host kernels on the calling thread. Device tensors
//! behave exactly as they would on a GPU (no element access, placement checks,
//! explicit transfers), which makes the device code paths testable anywhere.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ember_ai::backend::install_accelerator;
//! use ember_ai::device::emulated::EmulatedAccelerator;
//! use ember_ai::tensor2d;
//! use ember_ai::tensors::Tensor;
//!
//! install_accelerator(Arc::new(EmulatedAccelerator::new()));
//! let mut t = tensor2d!([[1.0, 2.0]]);
//! t.to_device().unwrap();
//! assert!(t.to_vec().is_err());
//! t.to_host().unwrap();
//! assert_eq!(t.to_vec().unwrap(), vec![1.0, 2.0]);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{
    Accelerator, AdamStep, ArithmeticOp, BufferHandle, ConvSpec, DeviceSlice, Extent, MatMulDims,
    MatMulVariant, WindowSpec,
};
use crate::error::{Error, Result};
use crate::exec::ExecutionStrategy;
use crate::ops::activation::Activation;
use crate::ops::{cpu, loss, optim};
use crate::tensors::Grid;

/// An [`Accelerator`] backed by host memory.
#[derive(Debug, Default)]
pub struct EmulatedAccelerator {
    buffers: Mutex<HashMap<u64, Vec<f32>>>,
    next: AtomicU64,
}

impl EmulatedAccelerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocations not yet released.
    pub fn live_buffers(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Vec<f32>>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copies a slice out of device memory.
    fn read(&self, src: DeviceSlice) -> Result<Vec<f32>> {
        let buffers = self.lock();
        Ok(range(&buffers, src)?.to_vec())
    }

    /// Runs `f` over a slice of device memory.
    fn update(&self, dst: DeviceSlice, f: impl FnOnce(&mut [f32])) -> Result<()> {
        let mut buffers = self.lock();
        let buf = buffers
            .get_mut(&dst.handle.0)
            .ok_or_else(|| Error::device(format!("unknown buffer {}", dst.handle.0)))?;
        let len = buf.len();
        let data = buf
            .get_mut(dst.offset..dst.offset + dst.len)
            .ok_or_else(|| out_of_bounds(dst, len))?;
        f(data);
        Ok(())
    }

    fn write(&self, dst: DeviceSlice, src: &[f32]) -> Result<()> {
        if src.len() != dst.len {
            return Err(Error::device(format!(
                "copy of {} floats into a slice of {}",
                src.len(),
                dst.len
            )));
        }
        self.update(dst, |d| d.copy_from_slice(src))
    }
}

fn range(buffers: &HashMap<u64, Vec<f32>>, src: DeviceSlice) -> Result<&[f32]> {
    let buf = buffers
        .get(&src.handle.0)
        .ok_or_else(|| Error::device(format!("unknown buffer {}", src.handle.0)))?;
    buf.get(src.offset..src.offset + src.len)
        .ok_or_else(|| out_of_bounds(src, buf.len()))
}

fn out_of_bounds(slice: DeviceSlice, len: usize) -> Error {
    Error::device(format!(
        "slice {}..{} outside buffer {} of {len} floats",
        slice.offset,
        slice.offset + slice.len,
        slice.handle.0
    ))
}

/// Packed operand extents of a product.
fn product_extents(variant: MatMulVariant, dims: MatMulDims) -> (Extent, Extent) {
    let MatMulDims { m, k, n } = dims;
    match variant {
        MatMulVariant::Plain => (Extent::new(m, k, 1), Extent::new(k, n, 1)),
        MatMulVariant::LeftTranspose => (Extent::new(k, m, 1), Extent::new(k, n, 1)),
        MatMulVariant::RightTranspose => (Extent::new(m, k, 1), Extent::new(n, k, 1)),
    }
}

impl Accelerator for EmulatedAccelerator {
    fn name(&self) -> &str {
        "emulated"
    }

    fn alloc(&self, len: usize) -> Result<BufferHandle> {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, vec![0.0; len]);
        Ok(BufferHandle(id))
    }

    fn dealloc(&self, handle: BufferHandle) {
        self.lock().remove(&handle.0);
    }

    fn copy_host_to_device(&self, dst: DeviceSlice, src: &[f32]) -> Result<()> {
        self.write(dst, src)
    }

    fn copy_device_to_host(&self, dst: &mut [f32], src: DeviceSlice) -> Result<()> {
        let buffers = self.lock();
        let data = range(&buffers, src)?;
        if data.len() != dst.len() {
            return Err(Error::device(format!(
                "copy of {} floats into a host slice of {}",
                data.len(),
                dst.len()
            )));
        }
        dst.copy_from_slice(data);
        Ok(())
    }

    fn copy_device_to_device(&self, dst: DeviceSlice, src: DeviceSlice) -> Result<()> {
        let data = self.read(src)?;
        self.write(dst, &data)
    }

    fn mem_set(&self, dst: DeviceSlice, value: f32) -> Result<()> {
        self.update(dst, |d| d.fill(value))
    }

    fn random_uniform(&self, dst: DeviceSlice, min: f32, max: f32, seed: u64) -> Result<()> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.update(dst, |d| {
            for v in d {
                *v = min + rng.random::<f32>() * (max - min);
            }
        })
    }

    fn scalar(&self, op: ArithmeticOp, dst: DeviceSlice, value: f32) -> Result<()> {
        self.update(dst, |d| {
            for v in d {
                *v = op.apply(*v, value);
            }
        })
    }

    fn element_wise(&self, op: ArithmeticOp, dst: DeviceSlice, rhs: DeviceSlice) -> Result<()> {
        let rhs = self.read(rhs)?;
        self.update(dst, |d| {
            for (v, r) in d.iter_mut().zip(&rhs) {
                *v = op.apply(*v, *r);
            }
        })
    }

    fn activation(&self, activation: Activation, dst: DeviceSlice) -> Result<()> {
        self.update(dst, |d| {
            for v in d {
                *v = activation.apply(*v);
            }
        })
    }

    fn adam(
        &self,
        step: AdamStep,
        params: DeviceSlice,
        grads: DeviceSlice,
        m: DeviceSlice,
        v: DeviceSlice,
    ) -> Result<()> {
        let grads = self.read(grads)?;
        let mut first = self.read(m)?;
        let mut second = self.read(v)?;
        self.update(params, |p| {
            for (i, value) in p.iter_mut().enumerate() {
                *value = optim::adam_step(&step, *value, grads[i], &mut first[i], &mut second[i]);
            }
        })?;
        self.write(m, &first)?;
        self.write(v, &second)
    }

    fn matrix_mult(
        &self,
        variant: MatMulVariant,
        dims: MatMulDims,
        left: DeviceSlice,
        right: DeviceSlice,
        out: DeviceSlice,
    ) -> Result<()> {
        let (left_extent, right_extent) = product_extents(variant, dims);
        let left = self.read(left)?;
        let right = self.read(right)?;
        let mut product = vec![0.0; dims.m * dims.n];
        cpu::matrix_mult(
            &ExecutionStrategy::Serial,
            variant,
            dims,
            Grid::packed(&left, left_extent),
            Grid::packed(&right, right_extent),
            &mut product,
        );
        self.write(out, &product)
    }

    fn convolution(
        &self,
        spec: &ConvSpec,
        input: DeviceSlice,
        kernel: DeviceSlice,
        output: DeviceSlice,
    ) -> Result<()> {
        let input = self.read(input)?;
        let kernel = self.read(kernel)?;
        let sums = cpu::convolution(
            &ExecutionStrategy::Serial,
            spec,
            Grid::packed(&input, spec.input),
            Grid::packed(&kernel, spec.kernel),
        );
        self.update(output, |d| {
            for (v, s) in d.iter_mut().zip(&sums) {
                *v += s;
            }
        })
    }

    fn max_pool(&self, spec: &WindowSpec, input: DeviceSlice, output: DeviceSlice) -> Result<()> {
        let input = self.read(input)?;
        let mut pooled = vec![0.0; spec.coarse.size()];
        cpu::max_pool(
            &ExecutionStrategy::Serial,
            spec,
            Grid::packed(&input, spec.fine),
            &mut pooled,
        );
        self.write(output, &pooled)
    }

    fn distribute_reverse_max_pool(
        &self,
        spec: &WindowSpec,
        distributed: DeviceSlice,
        input: DeviceSlice,
        output: DeviceSlice,
    ) -> Result<()> {
        let input = self.read(input)?;
        let output = self.read(output)?;
        let writes = cpu::reverse_max_pool(
            &ExecutionStrategy::Serial,
            spec,
            Grid::packed(&input, spec.fine),
            Grid::packed(&output, spec.coarse),
        );
        let fine = spec.fine;
        self.update(distributed, |d| {
            for ((r, c, depth), v) in writes {
                d[depth * fine.plane() + r * fine.cols + c] = v;
            }
        })
    }

    fn nearest_upsample(
        &self,
        spec: &WindowSpec,
        input: DeviceSlice,
        output: DeviceSlice,
    ) -> Result<()> {
        let input = self.read(input)?;
        let mut up = vec![0.0; spec.fine.size()];
        cpu::nearest_upsample(
            &ExecutionStrategy::Serial,
            spec,
            Grid::packed(&input, spec.coarse),
            &mut up,
        );
        self.write(output, &up)
    }

    fn distribute_reverse_nearest_upsample(
        &self,
        spec: &WindowSpec,
        distributed: DeviceSlice,
        output: DeviceSlice,
    ) -> Result<()> {
        let output = self.read(output)?;
        let mut sums = vec![0.0; spec.coarse.size()];
        cpu::reverse_nearest_upsample(
            &ExecutionStrategy::Serial,
            spec,
            Grid::packed(&output, spec.fine),
            &mut sums,
        );
        self.write(distributed, &sums)
    }

    fn dropout(
        &self,
        rate: f32,
        seed: u64,
        input: DeviceSlice,
        output: DeviceSlice,
        mask: Option<DeviceSlice>,
    ) -> Result<()> {
        let input = self.read(input)?;
        let keep = cpu::keep_mask(&ExecutionStrategy::Serial, input.len(), rate, seed);
        let scale = 1.0 / (1.0 - rate);
        self.update(output, |d| {
            for ((v, x), k) in d.iter_mut().zip(&input).zip(&keep) {
                if *k > 0.0 {
                    *v = x * scale;
                }
            }
        })?;
        if let Some(mask) = mask {
            self.update(mask, |d| {
                for (v, k) in d.iter_mut().zip(&keep) {
                    if *k > 0.0 {
                        *v = 1.0;
                    }
                }
            })?;
        }
        Ok(())
    }

    fn cross_entropy_gradient(
        &self,
        prediction: DeviceSlice,
        target: DeviceSlice,
        gradient: DeviceSlice,
    ) -> Result<()> {
        let prediction = self.read(prediction)?;
        let target = self.read(target)?;
        let n = prediction.len();
        self.update(gradient, |g| {
            for ((v, p), t) in g.iter_mut().zip(&prediction).zip(&target) {
                *v = loss::gradient_at(*p, *t, n);
            }
        })
    }
}
