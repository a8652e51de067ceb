//! Element-wise activation maps.
//!
//! Activations run in place. Host tensors go through [`Tensor::map`]; device
//! tensors call the accelerator's `activation` primitive with the same
//! variant, so one enum describes both paths.

use crate::error::{Error, Result};
use crate::memory::Placement;
use crate::tensors::Tensor;

/// The fixed set of activation maps and their derivatives.
///
/// Derivatives take the pre-activation value `z`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    /// `1 / (1 + e^-z)`
    Sigmoid,
    /// `σ(z) · (1 - σ(z))`
    SigmoidDerivative,
    /// `z` for positive `z`, `alpha · z` otherwise. `alpha = 0` is plain ReLU.
    Relu { alpha: f32 },
    /// `1` for positive `z`, `alpha` otherwise.
    ReluDerivative { alpha: f32 },
}

impl Activation {
    /// Plain ReLU.
    pub const RELU: Self = Self::Relu { alpha: 0.0 };

    #[inline]
    pub fn apply(self, z: f32) -> f32 {
        match self {
            Self::Sigmoid => sigmoid(z),
            Self::SigmoidDerivative => {
                let s = sigmoid(z);
                s * (1.0 - s)
            }
            Self::Relu { alpha } => {
                if z > 0.0 {
                    z
                } else {
                    alpha * z
                }
            }
            Self::ReluDerivative { alpha } => {
                if z > 0.0 {
                    1.0
                } else {
                    alpha
                }
            }
        }
    }

    /// The derivative matching a forward activation. Derivatives map to themselves.
    pub fn derivative(self) -> Self {
        match self {
            Self::Sigmoid | Self::SigmoidDerivative => Self::SigmoidDerivative,
            Self::Relu { alpha } | Self::ReluDerivative { alpha } => Self::ReluDerivative { alpha },
        }
    }

    /// Shader selector and parameter.
    #[cfg_attr(not(feature = "wgpu"), allow(dead_code))]
    pub(crate) fn code(self) -> (u32, f32) {
        match self {
            Self::Sigmoid => (0, 0.0),
            Self::SigmoidDerivative => (1, 0.0),
            Self::Relu { alpha } => (2, alpha),
            Self::ReluDerivative { alpha } => (3, alpha),
        }
    }
}

#[inline]
fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

/// Applies `activation` to every element of `tensor` in place.
///
/// # Errors
/// [`Error::ReadOnlyWatcher`] for views, accelerator failures on device.
pub fn activate<T: Tensor>(tensor: &mut T, activation: Activation) -> Result<()> {
    match tensor.placement() {
        Placement::Host => tensor.map(|z| activation.apply(z)),
        Placement::Device => {
            let dst = tensor.device_target()?;
            let acc = tensor.accelerator().ok_or(Error::AcceleratorMissing)?;
            log::trace!("device activation {activation:?} over {} floats", dst.len);
            acc.activation(activation, dst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approx::approx_eq_f32;
    use crate::tensor2d;

    #[test]
    fn leaky_relu_scales_negatives() {
        let mut t = tensor2d!([[-2.0, 0.0, 3.0]]);
        activate(&mut t, Activation::Relu { alpha: 0.1 }).unwrap();
        let v = t.to_vec().unwrap();
        assert!(approx_eq_f32(v[0], -0.2, 1e-6));
        assert_eq!(&v[1..], &[0.0, 3.0]);
    }

    #[test]
    fn sigmoid_derivative_peaks_at_zero() {
        assert!(approx_eq_f32(Activation::Sigmoid.apply(0.0), 0.5, 1e-6));
        assert!(approx_eq_f32(Activation::SigmoidDerivative.apply(0.0), 0.25, 1e-6));
        assert_eq!(Activation::RELU.derivative(), Activation::ReluDerivative { alpha: 0.0 });
    }
}
