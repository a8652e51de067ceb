use super::unravel;
use crate::device::{ConvMode, ConvSpec};
use crate::exec::ExecutionStrategy;
use crate::tensors::Grid;

/// Convolution contributions, packed in the shape of `spec.output`.
///
/// The caller adds the result onto its output tensor. Positions that fall
/// outside the input after padding contribute zero. With `spec.flip` the
/// kernel is read rotated by 180°.
///
/// 2D outputs are split by rows, 3D outputs by planes.
#[must_use]
pub fn convolution(
    strategy: &ExecutionStrategy,
    spec: &ConvSpec,
    input: Grid<'_>,
    kernel: Grid<'_>,
) -> Vec<f32> {
    let out = spec.output;
    let mut sums = vec![0.0; out.size()];
    let unit = match spec.mode {
        ConvMode::Planar | ConvMode::Summed => out.cols,
        ConvMode::PerInputDepth | ConvMode::PerKernelDepth => out.plane(),
    };

    strategy.fill(&mut sums, unit, |flat| {
        let (y, x, d) = unravel(out, flat);
        match spec.mode {
            ConvMode::Planar => taps(spec, input, 0, kernel, 0, y, x),
            ConvMode::Summed => (0..spec.kernel.depth)
                .map(|kd| taps(spec, input, kd, kernel, kd, y, x))
                .sum(),
            ConvMode::PerInputDepth => taps(spec, input, d, kernel, 0, y, x),
            ConvMode::PerKernelDepth => taps(spec, input, 0, kernel, d, y, x),
        }
    });
    sums
}

/// Kernel plane `kernel_depth` applied to input plane `input_depth` at output `(y, x)`.
#[inline]
fn taps(
    spec: &ConvSpec,
    input: Grid<'_>,
    input_depth: usize,
    kernel: Grid<'_>,
    kernel_depth: usize,
    y: usize,
    x: usize,
) -> f32 {
    let k = spec.kernel;
    let mut sum = 0.0;
    for ky in 0..k.rows {
        let Some(py) = (y * spec.stride + ky).checked_sub(spec.padding) else {
            continue;
        };
        if py >= spec.input.rows {
            break;
        }
        for kx in 0..k.cols {
            let Some(px) = (x * spec.stride + kx).checked_sub(spec.padding) else {
                continue;
            };
            if px >= spec.input.cols {
                break;
            }
            let (ry, rx) = if spec.flip {
                (k.rows - 1 - ky, k.cols - 1 - kx)
            } else {
                (ky, kx)
            };
            sum += input.at(py, px, input_depth) * kernel.at(ry, rx, kernel_depth);
        }
    }
    sum
}
