//! Loss gradients.

use crate::error::Result;
use crate::ops::dispatch::{Route, route};
use crate::tensors::Tensor;

/// Predictions at or below this are treated as zero and get no gradient.
pub const PREDICTION_FLOOR: f32 = 1e-8;

/// Gradient of the cross-entropy loss with respect to `prediction`.
///
/// Writes `-target / prediction / n` into `gradient` where the prediction
/// exceeds [`PREDICTION_FLOOR`], and `0` elsewhere. `n` is the element count.
///
/// # Panics
/// If the three tensors differ in element count.
///
/// # Errors
/// [`Error::PlacementMismatch`](crate::Error::PlacementMismatch) unless all
/// three share a placement, and on device one accelerator.
pub fn cross_entropy_gradient(
    prediction: &dyn Tensor,
    target: &dyn Tensor,
    gradient: &mut dyn Tensor,
) -> Result<()> {
    let n = prediction.size();
    assert!(
        target.size() == n && gradient.size() == n,
        "prediction, target and gradient must have the same element count"
    );

    match route(&[prediction, target, &*gradient])? {
        Route::Host => {
            let p = prediction.grid()?;
            let t = target.grid()?;
            let layout = gradient.layout();
            let out = gradient.host_data_mut()?;
            for i in 0..n {
                out[layout.traverse_to(i)] = gradient_at(p.traversed(i), t.traversed(i), n);
            }
            Ok(())
        }
        Route::Device(acc) => {
            acc.cross_entropy_gradient(
                prediction.device_slice()?,
                target.device_slice()?,
                gradient.device_target()?,
            )
        }
    }
}

#[inline]
pub(crate) fn gradient_at(prediction: f32, target: f32, n: usize) -> f32 {
    if prediction > PREDICTION_FLOOR {
        -target / prediction / n as f32
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor2d;
    use crate::tensors::Tensor2D;

    #[test]
    fn gradient_is_scaled_by_element_count() {
        let p = tensor2d!([[0.5, 0.0]]);
        let t = tensor2d!([[1.0, 1.0]]);
        let mut g = Tensor2D::new(1, 2);
        cross_entropy_gradient(&p, &t, &mut g).unwrap();
        assert_eq!(g.to_vec().unwrap(), vec![-1.0, 0.0]);
    }
}
