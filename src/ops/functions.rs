//! Free-standing tensor helpers.
//!
//! These are the small utilities layers reach for next to the kernels:
//! reductions, transposition, random initialisation and convolution sizing.
//! Except for the random constructors they are host-only and report
//! [`Error::DataOnDevice`] for device tensors.
//!
//! [`Error::DataOnDevice`]: crate::error::Error::DataOnDevice

use rand::Rng;

use crate::error::Result;
use crate::memory::{Buffer, DeviceBuffer, Placement};
use crate::tensors::{Tensor, Tensor2D, Tensor3D};

/// Sum of every element in traversal order.
pub fn sum(tensor: &dyn Tensor) -> Result<f32> {
    let grid = tensor.grid()?;
    Ok((0..grid.size()).map(|i| grid.traversed(i)).sum())
}

/// `(row, col)` of the first strictly greatest element in a row-major scan.
///
/// # Panics
/// If the matrix is empty.
pub fn max_pos(matrix: &Tensor2D<'_>) -> Result<(usize, usize)> {
    assert!(matrix.size() > 0, "max_pos of an empty matrix");
    let grid = matrix.grid()?;
    let mut best = (0, 0);
    let mut max = grid.at(0, 0, 0);
    for r in 0..matrix.rows() {
        for c in 0..matrix.cols() {
            let v = grid.at(r, c, 0);
            if v > max {
                max = v;
                best = (r, c);
            }
        }
    }
    Ok(best)
}

/// Materialised transpose of `matrix`.
pub fn transpose(matrix: &Tensor2D<'_>) -> Result<Tensor2D<'static>> {
    let grid = matrix.grid()?;
    Ok(Tensor2D::from_fn(matrix.cols(), matrix.rows(), |r, c| {
        grid.at(c, r, 0)
    }))
}

/// `rows × cols` matrix of uniform samples from `[min, max)`.
///
/// Device matrices are filled by the accelerator's generator.
pub fn random_2d(
    rows: usize,
    cols: usize,
    min: f32,
    max: f32,
    placement: Placement,
) -> Result<Tensor2D<'static>> {
    Ok(Tensor2D::from_buffer(
        rows,
        cols,
        random_buffer(rows * cols, min, max, placement)?,
    ))
}

/// `rows × cols × depth` volume of uniform samples from `[min, max)`.
pub fn random_3d(
    rows: usize,
    cols: usize,
    depth: usize,
    min: f32,
    max: f32,
    placement: Placement,
) -> Result<Tensor3D<'static>> {
    Ok(Tensor3D::from_buffer(
        rows,
        cols,
        depth,
        random_buffer(rows * cols * depth, min, max, placement)?,
    ))
}

fn random_buffer(len: usize, min: f32, max: f32, placement: Placement) -> Result<Buffer> {
    let mut rng = rand::rng();
    match placement {
        Placement::Host => Ok(Buffer::Host(
            (0..len)
                .map(|_| min + rng.random::<f32>() * (max - min))
                .collect(),
        )),
        Placement::Device => {
            let acc = crate::backend::accelerator()?;
            let buf = DeviceBuffer::allocate(&acc, len)?;
            acc.random_uniform(buf.slice(), min, max, rng.random())?;
            Ok(Buffer::Device(buf))
        }
    }
}

/// Output length of a convolution along one axis.
///
/// `(input - kernel + 2·padding) / stride + 1`
///
/// # Panics
/// If `stride` is zero or the padded input is smaller than the kernel.
pub const fn conv_output_size(input: usize, kernel: usize, stride: usize, padding: usize) -> usize {
    assert!(stride > 0, "stride must be positive");
    assert!(input + 2 * padding >= kernel, "kernel larger than padded input");
    (input + 2 * padding - kernel) / stride + 1
}

/// Dot product of two equally shaped matrices, each in its own traversal order.
///
/// # Panics
/// If the shapes differ.
pub fn kernel_operation(window: &Tensor2D<'_>, kernel: &Tensor2D<'_>) -> Result<f32> {
    assert!(
        window.rows() == kernel.rows() && window.cols() == kernel.cols(),
        "window {}×{} does not match kernel {}×{}",
        window.rows(),
        window.cols(),
        kernel.rows(),
        kernel.cols()
    );
    let w = window.grid()?;
    let k = kernel.grid()?;
    Ok((0..w.size()).map(|i| w.traversed(i) * k.traversed(i)).sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor2d;
    use crate::tensors::Window;

    #[test]
    fn max_pos_keeps_first_maximum() {
        let t = tensor2d!([[1.0, 9.0], [9.0, 3.0]]);
        assert_eq!(max_pos(&t).unwrap(), (0, 1));
    }

    #[test]
    fn transpose_swaps_axes() {
        let t = tensor2d!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let tt = transpose(&t).unwrap();
        assert_eq!(tt.to_rows().unwrap(), vec![vec![1.0, 4.0], vec![2.0, 5.0], vec![3.0, 6.0]]);
    }

    #[test]
    fn kernel_operation_over_strided_window() {
        let m = Tensor2D::from_fn(3, 3, |r, c| (r * 3 + c) as f32);
        let corners = m.view_window(Window::new(0, 0, 2, 2).skipping(1, 1));
        let ones = Tensor2D::filled(2, 2, 1.0);
        // 0 + 2 + 6 + 8
        assert_eq!(kernel_operation(&corners, &ones).unwrap(), 16.0);
        assert_eq!(sum(&corners).unwrap(), 16.0);
    }

    #[test]
    fn random_values_stay_in_range() {
        let t = random_2d(8, 8, -0.5, 0.5, Placement::Host).unwrap();
        assert!(t.to_vec().unwrap().iter().all(|v| (-0.5..0.5).contains(v)));
    }

    #[test]
    fn conv_size_formula() {
        assert_eq!(conv_output_size(5, 3, 1, 0), 3);
        assert_eq!(conv_output_size(5, 3, 2, 1), 3);
        assert_eq!(conv_output_size(4, 2, 2, 0), 2);
    }
}
