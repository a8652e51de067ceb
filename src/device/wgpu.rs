//! WGSL compute backend.
//!
//! Device buffers are `wgpu` storage buffers owned by the accelerator. Every
//! primitive binds a small `array<u32>` of parameters at binding 0 (offsets,
//! lengths, shape, and `f32` values passed as their bit patterns) followed by
//! the whole storage buffers it reads and writes. Slices are addressed by the
//! offsets in the parameter block, so no binding ever needs an aligned offset.
//!
//! All shaders are validated and compiled once when the accelerator is
//! created. Each call is submitted and waited for before returning.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ember_ai::backend::install_accelerator;
//! use ember_ai::device::wgpu::WgpuAccelerator;
//!
//! let gpu = WgpuAccelerator::new()?;
//! install_accelerator(Arc::new(gpu));
//! # Ok::<(), ember_ai::Error>(())
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};

use briny::prelude::*;
use wgpu::util::DeviceExt;

use super::{
    Accelerator, AdamStep, ArithmeticOp, BufferHandle, ConvMode, ConvSpec, DeviceSlice,
    MatMulDims, MatMulVariant, WindowSpec,
};
use crate::error::{Error, Result};
use crate::ops::activation::Activation;

const FILL: &str = include_str!("shaders/fill.wgsl");
const RANDOM: &str = include_str!("shaders/random.wgsl");
const SCALAR: &str = include_str!("shaders/scalar.wgsl");
const BINARY: &str = include_str!("shaders/binary.wgsl");
const ACTIVATION: &str = include_str!("shaders/activation.wgsl");
const ADAM: &str = include_str!("shaders/adam.wgsl");
const MATMUL: &str = include_str!("shaders/matmul.wgsl");
const CONV: &str = include_str!("shaders/conv.wgsl");
const MAX_POOL: &str = include_str!("shaders/max_pool.wgsl");
const REVERSE_MAX_POOL: &str = include_str!("shaders/reverse_max_pool.wgsl");
const UPSAMPLE: &str = include_str!("shaders/upsample.wgsl");
const REVERSE_UPSAMPLE: &str = include_str!("shaders/reverse_upsample.wgsl");
const DROPOUT: &str = include_str!("shaders/dropout.wgsl");
const CROSS_ENTROPY: &str = include_str!("shaders/cross_entropy.wgsl");

const WORKGROUP: usize = 64;
const MAX_GROUPS: usize = 65535;
const FLOAT: u64 = size_of::<f32>() as u64;

/// Holds the WGPU device and queue used for executing compute pipelines.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Selects the default adapter and opens a device with default limits.
    ///
    /// # Errors
    /// [`Error::Device`] when no adapter is available or the device request fails.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .map_err(|e| Error::device(format!("adapter error: {e}")))?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: None,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(|e| Error::device(format!("device error: {e}")))?;

        Ok(Self { device, queue })
    }
}

lazy_static::lazy_static! {
    static ref GPU_CONTEXT: std::result::Result<Arc<GpuContext>, String> =
        GpuContext::new().map(Arc::new).map_err(|e| e.to_string());
}

/// The process-wide GPU context, created on first use.
pub fn shared_context() -> Result<Arc<GpuContext>> {
    GPU_CONTEXT.as_ref().map(Arc::clone).map_err(|e| Error::Device(e.clone()))
}

/// Secure wrapper for WGSL source code.
pub struct WgslSource<'a>(pub &'a str);

impl Validate for WgslSource<'_> {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        let src = self.0;

        if src.len() > 65536 || !src.contains("fn main") {
            return Err(ValidationError);
        }
        if src.contains("import") || src.contains("#include") {
            return Err(ValidationError);
        }

        let forbidden = ["asm", "unsafe", "ptr", "std::"];
        if forbidden.iter().any(|bad| src.contains(bad)) {
            return Err(ValidationError);
        }
        Ok(())
    }
}

/// Validates `source` and compiles it on `device`.
pub fn load_shader(device: &wgpu::Device, label: &str, source: &str) -> Result<wgpu::ShaderModule> {
    WgslSource(source)
        .validate()
        .map_err(|_| Error::device(format!("shader `{label}` failed validation")))?;

    Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    }))
}

/// A compiled compute pipeline and the layout of its bind group.
struct Shader {
    label: &'static str,
    writable: Vec<bool>,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

impl Shader {
    /// `writable[i]` tells whether storage binding `i + 1` is written.
    fn new(
        device: &wgpu::Device,
        label: &'static str,
        source: &str,
        writable: &[bool],
    ) -> Result<Self> {
        let module = load_shader(device, label, source)?;

        let entries: Vec<_> = std::iter::once(false)
            .chain(writable.iter().copied())
            .enumerate()
            .map(|(binding, write)| wgpu::BindGroupLayoutEntry {
                binding: binding as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: !write },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            cache: None,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        Ok(Self {
            label,
            writable: writable.to_vec(),
            layout,
            pipeline,
        })
    }
}

struct Shaders {
    fill: Shader,
    random: Shader,
    scalar: Shader,
    binary: Shader,
    activation: Shader,
    adam: Shader,
    matmul: Shader,
    conv: Shader,
    max_pool: Shader,
    reverse_max_pool: Shader,
    upsample: Shader,
    reverse_upsample: Shader,
    dropout: Shader,
    cross_entropy: Shader,
}

impl Shaders {
    fn compile(device: &wgpu::Device) -> Result<Self> {
        Ok(Self {
            fill: Shader::new(device, "fill", FILL, &[true])?,
            random: Shader::new(device, "random", RANDOM, &[true])?,
            scalar: Shader::new(device, "scalar", SCALAR, &[true])?,
            binary: Shader::new(device, "binary", BINARY, &[true, false])?,
            activation: Shader::new(device, "activation", ACTIVATION, &[true])?,
            adam: Shader::new(device, "adam", ADAM, &[true, false, true, true])?,
            matmul: Shader::new(device, "matmul", MATMUL, &[false, false, true])?,
            conv: Shader::new(device, "conv", CONV, &[false, false, true])?,
            max_pool: Shader::new(device, "max_pool", MAX_POOL, &[false, true])?,
            reverse_max_pool: Shader::new(
                device,
                "reverse_max_pool",
                REVERSE_MAX_POOL,
                &[true, false, false],
            )?,
            upsample: Shader::new(device, "upsample", UPSAMPLE, &[false, true])?,
            reverse_upsample: Shader::new(
                device,
                "reverse_upsample",
                REVERSE_UPSAMPLE,
                &[true, false],
            )?,
            dropout: Shader::new(device, "dropout", DROPOUT, &[false, true, true])?,
            cross_entropy: Shader::new(
                device,
                "cross_entropy",
                CROSS_ENTROPY,
                &[false, false, true],
            )?,
        })
    }
}

/// An [`Accelerator`] running WGSL compute shaders through `wgpu`.
pub struct WgpuAccelerator {
    context: Arc<GpuContext>,
    shaders: Shaders,
    buffers: Mutex<HashMap<u64, Arc<wgpu::Buffer>>>,
    next: AtomicU64,
}

impl std::fmt::Debug for WgpuAccelerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuAccelerator")
            .field("live_buffers", &self.live_buffers())
            .finish_non_exhaustive()
    }
}

impl WgpuAccelerator {
    /// Opens the shared GPU context and compiles every shader.
    ///
    /// # Errors
    /// [`Error::Device`] when no GPU is usable or a shader is rejected.
    pub fn new() -> Result<Self> {
        let context = shared_context()?;
        let shaders = Shaders::compile(&context.device)?;
        log::debug!("wgpu accelerator ready");
        Ok(Self {
            context,
            shaders,
            buffers: Mutex::new(HashMap::new()),
            next: AtomicU64::new(0),
        })
    }

    /// Allocations not yet released.
    pub fn live_buffers(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Arc<wgpu::Buffer>>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves a slice to its buffer after checking it lies inside.
    fn buffer(&self, slice: DeviceSlice) -> Result<Arc<wgpu::Buffer>> {
        let buffer = self
            .lock()
            .get(&slice.handle.0)
            .cloned()
            .ok_or_else(|| Error::device(format!("unknown buffer {}", slice.handle.0)))?;
        let capacity = (buffer.size() / FLOAT) as usize;
        if slice.offset + slice.len > capacity {
            return Err(Error::device(format!(
                "slice {}..{} outside buffer {} of {capacity} floats",
                slice.offset,
                slice.offset + slice.len,
                slice.handle.0
            )));
        }
        Ok(buffer)
    }

    /// Binds `params` and `slices` in order and runs `threads` invocations.
    fn run(
        &self,
        shader: &Shader,
        params: &[u32],
        slices: &[DeviceSlice],
        threads: usize,
    ) -> Result<()> {
        if threads == 0 {
            return Ok(());
        }
        // a buffer written by the pass may not be bound a second time
        for (i, a) in slices.iter().enumerate() {
            let clash = slices.iter().enumerate().skip(i + 1).any(|(j, b)| {
                b.handle == a.handle && (shader.writable[i] || shader.writable[j])
            });
            if clash {
                return Err(Error::device(format!(
                    "`{}` writes buffer {} while reading it",
                    shader.label, a.handle.0
                )));
            }
        }
        let buffers = slices
            .iter()
            .map(|s| self.buffer(*s))
            .collect::<Result<Vec<_>>>()?;

        let device = &self.context.device;
        let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("params"),
            contents: bytemuck::cast_slice(params),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let entries: Vec<_> = std::iter::once(&params)
            .chain(buffers.iter().map(|b| &**b))
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(shader.label),
            layout: &shader.layout,
            entries: &entries,
        });

        let groups = threads.div_ceil(WORKGROUP);
        let (x, y) = if groups <= MAX_GROUPS {
            (groups, 1)
        } else {
            (MAX_GROUPS, groups.div_ceil(MAX_GROUPS))
        };

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(shader.label),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(shader.label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&shader.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(x as u32, y as u32, 1);
        }
        self.context.queue.submit(Some(encoder.finish()));
        log::trace!("dispatched `{}` over {threads} invocations", shader.label);
        self.wait()
    }

    fn wait(&self) -> Result<()> {
        self.context
            .device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|e| Error::device(format!("poll failed: {e}")))
    }

    fn copy(&self, dst: DeviceSlice, src: DeviceSlice) -> Result<()> {
        let from = self.buffer(src)?;
        let to = self.buffer(dst)?;
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("copy") });
        encoder.copy_buffer_to_buffer(
            &from,
            src.offset as u64 * FLOAT,
            &to,
            dst.offset as u64 * FLOAT,
            src.len as u64 * FLOAT,
        );
        self.context.queue.submit(Some(encoder.finish()));
        self.wait()
    }
}

fn bits(value: f32) -> u32 {
    value.to_bits()
}

/// Parameters shared by the pooling and upsampling shaders.
fn window_params(spec: &WindowSpec) -> Vec<u32> {
    [
        spec.fine.rows,
        spec.fine.cols,
        spec.coarse.rows,
        spec.coarse.cols,
        spec.coarse.depth,
        spec.window_rows,
        spec.window_cols,
    ]
    .into_iter()
    .map(|v| v as u32)
    .collect()
}

impl Accelerator for WgpuAccelerator {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn alloc(&self, len: usize) -> Result<BufferHandle> {
        if u32::try_from(len).is_err() {
            return Err(Error::device(format!("allocation of {len} floats is too large")));
        }
        let buffer = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tensor"),
            size: len.max(1) as u64 * FLOAT,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, Arc::new(buffer));
        Ok(BufferHandle(id))
    }

    fn dealloc(&self, handle: BufferHandle) {
        if let Some(buffer) = self.lock().remove(&handle.0) {
            buffer.destroy();
        }
    }

    fn copy_host_to_device(&self, dst: DeviceSlice, src: &[f32]) -> Result<()> {
        if src.len() != dst.len {
            return Err(Error::device(format!(
                "copy of {} floats into a slice of {}",
                src.len(),
                dst.len
            )));
        }
        let buffer = self.buffer(dst)?;
        if !src.is_empty() {
            self.context
                .queue
                .write_buffer(&buffer, dst.offset as u64 * FLOAT, bytemuck::cast_slice(src));
        }
        Ok(())
    }

    fn copy_device_to_host(&self, dst: &mut [f32], src: DeviceSlice) -> Result<()> {
        if src.len != dst.len() {
            return Err(Error::device(format!(
                "copy of {} floats into a host slice of {}",
                src.len,
                dst.len()
            )));
        }
        let buffer = self.buffer(src)?;
        if dst.is_empty() {
            return Ok(());
        }

        let device = &self.context.device;
        let size = src.len as u64 * FLOAT;
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
        encoder.copy_buffer_to_buffer(&buffer, src.offset as u64 * FLOAT, &staging, 0, size);
        self.context.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.wait()?;
        rx.recv()
            .map_err(|_| Error::device("readback callback never ran"))?
            .map_err(|e| Error::device(format!("readback failed: {e}")))?;

        {
            let data = slice.get_mapped_range();
            let values: &[f32] = bytemuck::try_cast_slice(&data[..])
                .map_err(|e| Error::device(format!("readback cast failed: {e}")))?;
            dst.copy_from_slice(values);
        }
        staging.unmap();
        Ok(())
    }

    fn copy_device_to_device(&self, dst: DeviceSlice, src: DeviceSlice) -> Result<()> {
        if src.len != dst.len {
            return Err(Error::device(format!(
                "copy of {} floats into a slice of {}",
                src.len, dst.len
            )));
        }
        if src.len == 0 {
            return Ok(());
        }
        if src.handle != dst.handle {
            return self.copy(dst, src);
        }

        // buffers cannot copy onto themselves; go through a scratch allocation
        let scratch = self.alloc(src.len)?;
        let staged = DeviceSlice {
            handle: scratch,
            offset: 0,
            len: src.len,
        };
        let result = self.copy(staged, src).and_then(|()| self.copy(dst, staged));
        self.dealloc(scratch);
        result
    }

    fn mem_set(&self, dst: DeviceSlice, value: f32) -> Result<()> {
        let params = [dst.offset as u32, dst.len as u32, bits(value)];
        self.run(&self.shaders.fill, &params, &[dst], dst.len)
    }

    fn random_uniform(&self, dst: DeviceSlice, min: f32, max: f32, seed: u64) -> Result<()> {
        let params = [
            dst.offset as u32,
            dst.len as u32,
            bits(min),
            bits(max),
            seed as u32,
            (seed >> 32) as u32,
        ];
        self.run(&self.shaders.random, &params, &[dst], dst.len)
    }

    fn scalar(&self, op: ArithmeticOp, dst: DeviceSlice, value: f32) -> Result<()> {
        let params = [dst.offset as u32, dst.len as u32, op.code(), bits(value)];
        self.run(&self.shaders.scalar, &params, &[dst], dst.len)
    }

    fn element_wise(&self, op: ArithmeticOp, dst: DeviceSlice, rhs: DeviceSlice) -> Result<()> {
        let len = dst.len.min(rhs.len);
        let params = [dst.offset as u32, rhs.offset as u32, len as u32, op.code()];
        self.run(&self.shaders.binary, &params, &[dst, rhs], len)
    }

    fn activation(&self, activation: Activation, dst: DeviceSlice) -> Result<()> {
        let (kind, alpha) = activation.code();
        let params = [dst.offset as u32, dst.len as u32, kind, bits(alpha)];
        self.run(&self.shaders.activation, &params, &[dst], dst.len)
    }

    fn adam(
        &self,
        step: AdamStep,
        params: DeviceSlice,
        grads: DeviceSlice,
        m: DeviceSlice,
        v: DeviceSlice,
    ) -> Result<()> {
        let t = step.time_step as i32;
        let words = [
            params.offset as u32,
            grads.offset as u32,
            m.offset as u32,
            v.offset as u32,
            params.len as u32,
            bits(step.learning_rate),
            bits(step.beta1),
            bits(step.beta2),
            bits(step.epsilon),
            bits(1.0 - step.beta1.powi(t)),
            bits(1.0 - step.beta2.powi(t)),
        ];
        self.run(&self.shaders.adam, &words, &[params, grads, m, v], params.len)
    }

    fn matrix_mult(
        &self,
        variant: MatMulVariant,
        dims: MatMulDims,
        left: DeviceSlice,
        right: DeviceSlice,
        out: DeviceSlice,
    ) -> Result<()> {
        let variant = match variant {
            MatMulVariant::Plain => 0,
            MatMulVariant::LeftTranspose => 1,
            MatMulVariant::RightTranspose => 2,
        };
        let params = [
            variant,
            dims.m as u32,
            dims.k as u32,
            dims.n as u32,
            left.offset as u32,
            right.offset as u32,
            out.offset as u32,
        ];
        self.run(&self.shaders.matmul, &params, &[left, right, out], dims.m * dims.n)
    }

    fn convolution(
        &self,
        spec: &ConvSpec,
        input: DeviceSlice,
        kernel: DeviceSlice,
        output: DeviceSlice,
    ) -> Result<()> {
        let mode = match spec.mode {
            ConvMode::Planar => 0,
            ConvMode::Summed => 1,
            ConvMode::PerInputDepth => 2,
            ConvMode::PerKernelDepth => 3,
        };
        let shape = [
            spec.input.rows,
            spec.input.cols,
            spec.input.depth,
            spec.kernel.rows,
            spec.kernel.cols,
            spec.kernel.depth,
            spec.output.rows,
            spec.output.cols,
            spec.output.depth,
            spec.stride,
            spec.padding,
            input.offset,
            kernel.offset,
            output.offset,
        ];
        let params: Vec<u32> = [mode, u32::from(spec.flip)]
            .into_iter()
            .chain(shape.into_iter().map(|v| v as u32))
            .collect();
        self.run(
            &self.shaders.conv,
            &params,
            &[input, kernel, output],
            spec.output.size(),
        )
    }

    fn max_pool(&self, spec: &WindowSpec, input: DeviceSlice, output: DeviceSlice) -> Result<()> {
        let mut params = window_params(spec);
        params.extend([input.offset as u32, output.offset as u32]);
        self.run(
            &self.shaders.max_pool,
            &params,
            &[input, output],
            spec.coarse.size(),
        )
    }

    fn distribute_reverse_max_pool(
        &self,
        spec: &WindowSpec,
        distributed: DeviceSlice,
        input: DeviceSlice,
        output: DeviceSlice,
    ) -> Result<()> {
        let mut params = window_params(spec);
        params.extend([
            distributed.offset as u32,
            input.offset as u32,
            output.offset as u32,
        ]);
        self.run(
            &self.shaders.reverse_max_pool,
            &params,
            &[distributed, input, output],
            spec.coarse.size(),
        )
    }

    fn nearest_upsample(
        &self,
        spec: &WindowSpec,
        input: DeviceSlice,
        output: DeviceSlice,
    ) -> Result<()> {
        let mut params = window_params(spec);
        params.extend([input.offset as u32, output.offset as u32]);
        self.run(
            &self.shaders.upsample,
            &params,
            &[input, output],
            spec.fine.size(),
        )
    }

    fn distribute_reverse_nearest_upsample(
        &self,
        spec: &WindowSpec,
        distributed: DeviceSlice,
        output: DeviceSlice,
    ) -> Result<()> {
        let mut params = window_params(spec);
        params.extend([distributed.offset as u32, output.offset as u32]);
        self.run(
            &self.shaders.reverse_upsample,
            &params,
            &[distributed, output],
            spec.coarse.size(),
        )
    }

    fn dropout(
        &self,
        rate: f32,
        seed: u64,
        input: DeviceSlice,
        output: DeviceSlice,
        mask: Option<DeviceSlice>,
    ) -> Result<()> {
        // the shader always binds a mask; without one a single-float scratch stands in
        let (mask_slice, scratch) = match mask {
            Some(mask) => (mask, None),
            None => {
                let handle = self.alloc(1)?;
                let slice = DeviceSlice {
                    handle,
                    offset: 0,
                    len: 0,
                };
                (slice, Some(handle))
            }
        };
        let params = [
            input.offset as u32,
            output.offset as u32,
            mask_slice.offset as u32,
            input.len as u32,
            bits(rate),
            u32::from(mask.is_some()),
            seed as u32,
            (seed >> 32) as u32,
        ];
        let result = self.run(
            &self.shaders.dropout,
            &params,
            &[input, output, mask_slice],
            input.len,
        );
        if let Some(handle) = scratch {
            self.dealloc(handle);
        }
        result
    }

    fn cross_entropy_gradient(
        &self,
        prediction: DeviceSlice,
        target: DeviceSlice,
        gradient: DeviceSlice,
    ) -> Result<()> {
        let params = [
            prediction.offset as u32,
            target.offset as u32,
            gradient.offset as u32,
            prediction.len as u32,
        ];
        self.run(
            &self.shaders.cross_entropy,
            &params,
            &[prediction, target, gradient],
            prediction.len,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_sources_pass_validation() {
        for (name, source) in [
            ("fill", FILL),
            ("random", RANDOM),
            ("scalar", SCALAR),
            ("binary", BINARY),
            ("activation", ACTIVATION),
            ("adam", ADAM),
            ("matmul", MATMUL),
            ("conv", CONV),
            ("max_pool", MAX_POOL),
            ("reverse_max_pool", REVERSE_MAX_POOL),
            ("upsample", UPSAMPLE),
            ("reverse_upsample", REVERSE_UPSAMPLE),
            ("dropout", DROPOUT),
            ("cross_entropy", CROSS_ENTROPY),
        ] {
            assert!(WgslSource(source).validate().is_ok(), "{name}");
            if let Err(e) = naga::front::wgsl::parse_str(source) {
                panic!("{name}.wgsl: {}", e.emit_to_string(source));
            }
        }
    }

    #[test]
    fn validation_rejects_includes() {
        assert!(WgslSource("#include <x>\nfn main() {}").validate().is_err());
        assert!(WgslSource("fn helper() {}").validate().is_err());
    }

    fn gpu() -> Option<WgpuAccelerator> {
        match WgpuAccelerator::new() {
            Ok(gpu) => Some(gpu),
            Err(e) => {
                eprintln!("skipping: {e}");
                None
            }
        }
    }

    fn upload(gpu: &WgpuAccelerator, data: &[f32]) -> DeviceSlice {
        let handle = gpu.alloc(data.len()).unwrap();
        let slice = DeviceSlice {
            handle,
            offset: 0,
            len: data.len(),
        };
        gpu.copy_host_to_device(slice, data).unwrap();
        slice
    }

    fn download(gpu: &WgpuAccelerator, slice: DeviceSlice) -> Vec<f32> {
        let mut out = vec![0.0; slice.len];
        gpu.copy_device_to_host(&mut out, slice).unwrap();
        out
    }

    #[test]
    fn matmul_on_gpu() {
        let Some(gpu) = gpu() else { return };
        let a = upload(&gpu, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = upload(&gpu, &[7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        let out = upload(&gpu, &[0.0; 4]);
        gpu.matrix_mult(
            MatMulVariant::Plain,
            MatMulDims { m: 2, k: 3, n: 2 },
            a,
            b,
            out,
        )
        .unwrap();
        assert_eq!(download(&gpu, out), vec![58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn copies_within_one_buffer() {
        let Some(gpu) = gpu() else { return };
        let all = upload(&gpu, &[1.0, 2.0, 3.0, 4.0]);
        let head = DeviceSlice { len: 2, ..all };
        let tail = DeviceSlice { offset: 2, len: 2, ..all };
        gpu.copy_device_to_device(tail, head).unwrap();
        assert_eq!(download(&gpu, all), vec![1.0, 2.0, 1.0, 2.0]);
        gpu.dealloc(all.handle);
        assert_eq!(gpu.live_buffers(), 0);
    }

    #[test]
    fn operands_sharing_a_buffer_are_rejected() {
        let Some(gpu) = gpu() else { return };
        let all = upload(&gpu, &[1.0, 2.0, 3.0, 4.0]);
        let head = DeviceSlice { len: 2, ..all };
        let tail = DeviceSlice { offset: 2, len: 2, ..all };
        assert!(matches!(
            gpu.element_wise(ArithmeticOp::Add, head, tail),
            Err(Error::Device(_))
        ));
    }
}
