//! Tensor primitives used by optimizers.
//!
//! Optimizer policies (learning-rate schedules, parameter groups) live
//! outside this crate. What lives here is the per-step numeric update, with a
//! host path and a device path that agree within float tolerance.

use crate::device::{AdamStep, ArithmeticOp};
use crate::error::{Error, Result};
use crate::memory::{Buffer, DeviceBuffer, Placement};
use crate::ops::dispatch::{Route, route, same_accelerator};
use crate::tensors::Tensor;

/// `params -= learning_rate · grads`. `grads` is left untouched.
///
/// # Panics
/// If the element counts differ.
///
/// # Errors
/// [`Error::PlacementMismatch`] when the tensors are on different placements
/// or different accelerators.
pub fn sgd_update(params: &mut dyn Tensor, grads: &dyn Tensor, learning_rate: f32) -> Result<()> {
    assert_eq!(params.size(), grads.size(), "element count mismatch");
    match route(&[&*params, grads])? {
        Route::Host => {
            let g = grads.grid()?;
            let layout = params.layout();
            let p = params.host_data_mut()?;
            for i in 0..layout.size() {
                let idx = layout.traverse_to(i);
                p[idx] -= learning_rate * g.traversed(i);
            }
            Ok(())
        }
        Route::Device(acc) => {
            let scaled = DeviceBuffer::allocate(&acc, grads.size())?;
            acc.copy_device_to_device(scaled.slice(), grads.device_slice()?)?;
            acc.scalar(ArithmeticOp::Mult, scaled.slice(), learning_rate)?;
            acc.element_wise(ArithmeticOp::Sub, params.device_target()?, scaled.slice())
        }
    }
}

/// First and second moment estimates for one parameter tensor.
///
/// The moments live in the placement given at construction and must match
/// the placement of the parameters they update. Device moments are bound to
/// the accelerator installed when they were created.
#[derive(Debug)]
pub struct AdamMoments {
    m: Buffer,
    v: Buffer,
    time_step: u32,
}

impl AdamMoments {
    pub const BETA1: f32 = 0.9;
    pub const BETA2: f32 = 0.999;
    pub const EPSILON: f32 = 1e-7;

    /// Zeroed moments for `len` parameters.
    pub fn new(len: usize, placement: Placement) -> Result<Self> {
        Ok(Self {
            m: Buffer::filled(len, 0.0, placement)?,
            v: Buffer::filled(len, 0.0, placement)?,
            time_step: 1,
        })
    }

    /// Steps taken so far plus one.
    pub fn time_step(&self) -> u32 {
        self.time_step
    }

    /// One bias-corrected Adam step on `params`.
    ///
    /// # Panics
    /// If `params`, `grads` and the moments differ in length.
    ///
    /// # Errors
    /// [`Error::PlacementMismatch`] unless params, grads and moments share a
    /// placement, and on device one accelerator.
    pub fn update(
        &mut self,
        params: &mut dyn Tensor,
        grads: &dyn Tensor,
        learning_rate: f32,
    ) -> Result<()> {
        assert_eq!(params.size(), grads.size(), "element count mismatch");
        let step = AdamStep {
            learning_rate,
            beta1: Self::BETA1,
            beta2: Self::BETA2,
            epsilon: Self::EPSILON,
            time_step: self.time_step,
        };

        match (route(&[&*params, grads])?, &mut self.m, &mut self.v) {
            (Route::Host, Buffer::Host(m), Buffer::Host(v)) => {
                assert_eq!(m.len(), params.size(), "moment length mismatch");
                let g = grads.grid()?;
                let layout = params.layout();
                let p = params.host_data_mut()?;
                for i in 0..layout.size() {
                    let idx = layout.traverse_to(i);
                    p[idx] = adam_step(&step, p[idx], g.traversed(i), &mut m[i], &mut v[i]);
                }
            }
            (Route::Device(acc), Buffer::Device(m), Buffer::Device(v))
                if same_accelerator(&acc, m.accelerator())
                    && same_accelerator(&acc, v.accelerator()) =>
            {
                assert_eq!(m.len(), params.size(), "moment length mismatch");
                acc.adam(
                    step,
                    params.device_target()?,
                    grads.device_slice()?,
                    m.slice(),
                    v.slice(),
                )?;
            }
            _ => return Err(Error::PlacementMismatch),
        }

        self.time_step += 1;
        Ok(())
    }
}

/// Updates one moment pair and returns the new parameter value.
#[inline]
pub(crate) fn adam_step(step: &AdamStep, param: f32, grad: f32, m: &mut f32, v: &mut f32) -> f32 {
    *m = step.beta1 * *m + (1.0 - step.beta1) * grad;
    *v = step.beta2 * *v + (1.0 - step.beta2) * grad * grad;
    let t = step.time_step as i32;
    let m_hat = *m / (1.0 - step.beta1.powi(t));
    let v_hat = *v / (1.0 - step.beta2.powi(t));
    param - step.learning_rate * m_hat / (v_hat.sqrt() + step.epsilon)
}
