use super::unravel;
use crate::device::WindowSpec;
use crate::exec::ExecutionStrategy;
use crate::tensors::Grid;

/// Writes the maximum of every window of `input` into packed `out` (coarse extent).
///
/// Planes are split across the strategy's workers.
pub fn max_pool(strategy: &ExecutionStrategy, spec: &WindowSpec, input: Grid<'_>, out: &mut [f32]) {
    let coarse = spec.coarse;
    strategy.fill(out, coarse.plane(), |flat| {
        let (r, c, d) = unravel(coarse, flat);
        window_argmax(spec, input, r, c, d).1
    });
}

/// Destination `(row, col, depth)` in the fine grid and value for every window.
///
/// Each coarse `output` value is routed to the position of its window's
/// maximum in `input`, recomputed by scanning the window again.
#[must_use]
pub fn reverse_max_pool(
    strategy: &ExecutionStrategy,
    spec: &WindowSpec,
    input: Grid<'_>,
    output: Grid<'_>,
) -> Vec<((usize, usize, usize), f32)> {
    let coarse = spec.coarse;
    strategy
        .map_units(coarse.depth, |planes| {
            let mut writes = Vec::with_capacity(planes.len() * coarse.plane());
            for d in planes {
                for r in 0..coarse.rows {
                    for c in 0..coarse.cols {
                        let ((br, bc), _) = window_argmax(spec, input, r, c, d);
                        writes.push(((br, bc, d), output.at(r, c, d)));
                    }
                }
            }
            writes
        })
        .into_iter()
        .flatten()
        .collect()
}

/// Position and value of the first strictly greatest element of a window.
#[inline]
fn window_argmax(
    spec: &WindowSpec,
    input: Grid<'_>,
    r: usize,
    c: usize,
    d: usize,
) -> ((usize, usize), f32) {
    let (r0, c0) = (r * spec.window_rows, c * spec.window_cols);
    let mut best = (r0, c0);
    let mut max = input.at(r0, c0, d);
    for wr in 0..spec.window_rows {
        for wc in 0..spec.window_cols {
            let v = input.at(r0 + wr, c0 + wc, d);
            if v > max {
                max = v;
                best = (r0 + wr, c0 + wc);
            }
        }
    }
    (best, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Extent;

    #[test]
    fn ties_keep_the_first_position() {
        let input = [5.0, 5.0, 5.0, 5.0];
        let spec = WindowSpec {
            fine: Extent::new(2, 2, 1),
            coarse: Extent::new(1, 1, 1),
            window_rows: 2,
            window_cols: 2,
        };
        let writes = reverse_max_pool(
            &ExecutionStrategy::Serial,
            &spec,
            Grid::packed(&input, spec.fine),
            Grid::packed(&[1.5], spec.coarse),
        );
        assert_eq!(writes, vec![((0, 0, 0), 1.5)]);
    }
}
