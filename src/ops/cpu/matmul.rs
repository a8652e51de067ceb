use crate::device::{MatMulDims, MatMulVariant};
use crate::exec::ExecutionStrategy;
use crate::tensors::Grid;

/// Computes one of the three matrix products into packed `out` (`m×n`).
///
/// Transposed variants swap the roles of the inner-loop indices instead of
/// materialising a transpose.
///
/// # Requirements
///
/// - `Plain`: `left` is `m×k`, `right` is `k×n`
/// - `LeftTranspose`: `left` is `k×m`, `right` is `k×n`
/// - `RightTranspose`: `left` is `m×k`, `right` is `n×k`
///
/// Rows of `out` are split across the strategy's workers.
pub fn matrix_mult(
    strategy: &ExecutionStrategy,
    variant: MatMulVariant,
    dims: MatMulDims,
    left: Grid<'_>,
    right: Grid<'_>,
    out: &mut [f32],
) {
    let MatMulDims { m, k, n } = dims;
    debug_assert_eq!(out.len(), m * n);

    strategy.fill(out, n, |flat| {
        let (i, j) = (flat / n, flat % n);
        match variant {
            MatMulVariant::Plain => (0..k).map(|l| left.at(i, l, 0) * right.at(l, j, 0)).sum(),
            MatMulVariant::LeftTranspose => {
                (0..k).map(|l| left.at(l, i, 0) * right.at(l, j, 0)).sum()
            }
            MatMulVariant::RightTranspose => {
                (0..k).map(|l| left.at(i, l, 0) * right.at(j, l, 0)).sum()
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Extent;

    #[test]
    fn plain_product() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let mut out = [0.0; 4];
        matrix_mult(
            &ExecutionStrategy::Serial,
            MatMulVariant::Plain,
            MatMulDims { m: 2, k: 3, n: 2 },
            Grid::packed(&a, Extent::new(2, 3, 1)),
            Grid::packed(&b, Extent::new(3, 2, 1)),
            &mut out,
        );
        assert_eq!(out, [58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn left_transpose_reads_columns() {
        // aᵗ = [[1, 3], [2, 4]]
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [1.0, 0.0, 0.0, 1.0];
        let mut out = [0.0; 4];
        matrix_mult(
            &ExecutionStrategy::Serial,
            MatMulVariant::LeftTranspose,
            MatMulDims { m: 2, k: 2, n: 2 },
            Grid::packed(&a, Extent::new(2, 2, 1)),
            Grid::packed(&b, Extent::new(2, 2, 1)),
            &mut out,
        );
        assert_eq!(out, [1.0, 3.0, 2.0, 4.0]);
    }
}
