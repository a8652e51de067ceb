use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::exec::ExecutionStrategy;

const CHUNK_SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Keep flags (`1.0` kept, `0.0` dropped) for `len` elements.
///
/// An element is kept when its uniform draw from `[0, 1)` is at least
/// `rate`, so the keep probability is `1 - rate`. Each chunk seeds its own
/// generator from `seed` and its first index.
#[must_use]
pub fn keep_mask(strategy: &ExecutionStrategy, len: usize, rate: f32, seed: u64) -> Vec<f32> {
    let mut keep = vec![0.0; len];
    strategy.for_each_chunk(&mut keep, 1, |units, chunk| {
        let mut rng = StdRng::seed_from_u64(seed ^ (units.start as u64).wrapping_mul(CHUNK_SEED_MIX));
        for flag in chunk {
            *flag = if rng.random::<f32>() >= rate { 1.0 } else { 0.0 };
        }
    });
    keep
}
