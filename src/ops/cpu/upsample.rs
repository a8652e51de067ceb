use super::unravel;
use crate::device::WindowSpec;
use crate::exec::ExecutionStrategy;
use crate::tensors::Grid;

/// Broadcasts every coarse `input` value over its window in packed `out` (fine extent).
pub fn nearest_upsample(
    strategy: &ExecutionStrategy,
    spec: &WindowSpec,
    input: Grid<'_>,
    out: &mut [f32],
) {
    let fine = spec.fine;
    strategy.fill(out, fine.plane(), |flat| {
        let (r, c, d) = unravel(fine, flat);
        input.at(r / spec.window_rows, c / spec.window_cols, d)
    });
}

/// Sums every window of the fine `output` into packed `out` (coarse extent).
pub fn reverse_nearest_upsample(
    strategy: &ExecutionStrategy,
    spec: &WindowSpec,
    output: Grid<'_>,
    out: &mut [f32],
) {
    let coarse = spec.coarse;
    strategy.fill(out, coarse.plane(), |flat| {
        let (r, c, d) = unravel(coarse, flat);
        let (r0, c0) = (r * spec.window_rows, c * spec.window_cols);
        let mut sum = 0.0;
        for wr in 0..spec.window_rows {
            for wc in 0..spec.window_cols {
                sum += output.at(r0 + wr, c0 + wc, d);
            }
        }
        sum
    });
}
