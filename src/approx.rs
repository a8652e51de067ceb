//! Approximate equality of `f32` values and buffers.
//!
//! Host and device kernels are allowed to differ by rounding, so comparisons
//! between the two paths go through these helpers rather than `==`.

/// Loosest accepted difference.
pub const F32_MAX_ERROR: f32 = 1e-3;

/// Typical difference between host and device results.
pub const F32_AVG_ERROR: f32 = 1e-5;

/// Tightest meaningful difference.
pub const F32_MIN_ERROR: f32 = 1e-6;

/// How close two values are, from best to worst.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Within [`F32_MIN_ERROR`].
    Precise = 0,
    /// Within [`F32_AVG_ERROR`].
    Partial = 1,
    /// Within [`F32_MAX_ERROR`].
    Relative = 2,
    /// Not equal.
    Scarce = 3,
}

/// Rates the distance between two values or buffers.
pub trait RelativeEq<Rhs: ?Sized = Self> {
    fn approx_eq(&self, rhs: &Rhs) -> ApproxEquality;
}

impl RelativeEq for f32 {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        let dif = (self - rhs).abs();
        if dif < F32_MIN_ERROR {
            ApproxEquality::Precise
        } else if dif < F32_AVG_ERROR {
            ApproxEquality::Partial
        } else if dif < F32_MAX_ERROR {
            ApproxEquality::Relative
        } else {
            ApproxEquality::Scarce
        }
    }
}

/// Buffers rate as their worst element. Length mismatches are `Scarce`.
impl RelativeEq for [f32] {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        if self.len() != rhs.len() {
            return ApproxEquality::Scarce;
        }
        let mut worst = ApproxEquality::Precise;
        for (a, b) in self.iter().zip(rhs) {
            worst = worst.max(a.approx_eq(b));
            if worst == ApproxEquality::Scarce {
                break;
            }
        }
        worst
    }
}

/// `|a - b| <= epsilon`
#[inline]
pub fn approx_eq_f32(a: f32, b: f32, epsilon: f32) -> bool {
    (a - b).abs() <= epsilon
}

/// Equal lengths and every pair within `epsilon`.
pub fn all_close(a: &[f32], b: &[f32], epsilon: f32) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(&x, &y)| approx_eq_f32(x, y, epsilon))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_bad_element_spoils_a_buffer() {
        let a = [1.0, 2.0, 3.0];
        let b = [1.0, 2.000_000_1, 3.5];
        assert_eq!(a[..].approx_eq(&b[..]), ApproxEquality::Scarce);
        assert_eq!(a[..2].approx_eq(&b[..2]), ApproxEquality::Precise);
    }

    #[test]
    fn worst_rating_wins() {
        let a = [0.0, 0.0];
        let b = [0.000_002, 0.000_5];
        assert_eq!(a[..].approx_eq(&b[..]), ApproxEquality::Relative);
        assert!(all_close(&a, &b, 1e-3));
        assert!(!all_close(&a, &b[..1], 1.0));
    }
}
