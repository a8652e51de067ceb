//! Host work partitioning.
//!
//! Host kernels split their output's primary axis into contiguous chunks,
//! one per worker, sized by [`partition`]: every chunk gets `N / T` units and
//! the first `N % T` chunks get one more. All chunks are spawned before any is
//! awaited and the call returns only after every chunk finished, so a kernel
//! call looks atomic to its caller.
//!
//! Chunks write disjoint `&mut` sub-slices of the output, which is what lets
//! the fan-out run without locks.
//!
//! # Example
//!
//! ```rust
//! use ember_ai::exec::{partition, ExecutionStrategy};
//!
//! assert_eq!(partition(10, 3), vec![0..4, 4..7, 7..10]);
//!
//! let strategy = ExecutionStrategy::parallel(2).unwrap();
//! let mut out = vec![0.0; 6];
//! strategy.fill(&mut out, 1, |i| i as f32);
//! assert_eq!(out, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
//! ```

use std::ops::Range;
use std::sync::Arc;

use crate::config::ComputeConfig;
use crate::error::Result;

/// Splits `len` units into `parts` contiguous ranges covering `0..len`.
///
/// The first `len % parts` ranges are one unit longer. When `parts > len` the
/// trailing ranges are empty. `parts == 0` is treated as 1.
pub fn partition(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1);
    let base = len / parts;
    let extra = len % parts;

    let mut start = 0;
    (0..parts)
        .map(|i| {
            let end = start + base + usize::from(i < extra);
            let range = start..end;
            start = end;
            range
        })
        .collect()
}

/// How host kernels execute.
#[derive(Debug, Clone, Default)]
pub enum ExecutionStrategy {
    /// Everything on the calling thread.
    #[default]
    Serial,
    /// Fan out over a fixed-size pool and join.
    Parallel(Arc<rayon::ThreadPool>),
}

impl ExecutionStrategy {
    /// Builds a dedicated pool of `threads` workers.
    pub fn parallel(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("ember-worker-{i}"))
            .build()?;
        log::debug!("built host worker pool with {threads} threads");
        Ok(Self::Parallel(Arc::new(pool)))
    }

    /// Strategy described by `cfg`.
    pub fn from_config(cfg: &ComputeConfig) -> Result<Self> {
        if cfg.parallel {
            Self::parallel(cfg.threads)
        } else {
            Ok(Self::Serial)
        }
    }

    /// Number of chunks a kernel is split into.
    pub fn threads(&self) -> usize {
        match self {
            Self::Serial => 1,
            Self::Parallel(pool) => pool.current_num_threads(),
        }
    }

    /// Runs `f` once per chunk of `out`.
    ///
    /// `out` is viewed as `out.len() / unit_len` units of `unit_len` floats.
    /// Each call receives the unit range it owns and the matching sub-slice.
    ///
    /// # Panics
    /// If `out.len()` is not a multiple of `unit_len`.
    pub fn for_each_chunk<F>(&self, out: &mut [f32], unit_len: usize, f: F)
    where
        F: Fn(Range<usize>, &mut [f32]) + Sync,
    {
        if out.is_empty() || unit_len == 0 {
            return;
        }
        assert_eq!(out.len() % unit_len, 0, "output is not a whole number of units");
        let units = out.len() / unit_len;

        match self {
            Self::Serial => f(0..units, out),
            Self::Parallel(pool) => {
                let ranges = partition(units, pool.current_num_threads());
                let f = &f;
                pool.scope(|scope| {
                    let mut rest = out;
                    for range in ranges {
                        let (chunk, tail) =
                            std::mem::take(&mut rest).split_at_mut(range.len() * unit_len);
                        rest = tail;
                        if range.is_empty() {
                            continue;
                        }
                        scope.spawn(move |_| f(range, chunk));
                    }
                });
            }
        }
    }

    /// Sets every element of `out` to `f(flat_index)`.
    pub fn fill<F>(&self, out: &mut [f32], unit_len: usize, f: F)
    where
        F: Fn(usize) -> f32 + Sync,
    {
        self.for_each_chunk(out, unit_len, |units, chunk| {
            let base = units.start * unit_len;
            for (i, v) in chunk.iter_mut().enumerate() {
                *v = f(base + i);
            }
        });
    }

    /// Runs `f` over chunks of `0..units` and collects the per-chunk results in order.
    pub fn map_units<T, F>(&self, units: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(Range<usize>) -> T + Sync,
    {
        match self {
            Self::Serial => vec![f(0..units)],
            Self::Parallel(pool) => {
                let ranges = partition(units, pool.current_num_threads());
                let mut slots: Vec<Option<T>> = ranges.iter().map(|_| None).collect();
                let f = &f;
                pool.scope(|scope| {
                    for (slot, range) in slots.iter_mut().zip(ranges) {
                        if range.is_empty() {
                            continue;
                        }
                        scope.spawn(move |_| *slot = Some(f(range)));
                    }
                });
                slots.into_iter().flatten().collect()
            }
        }
    }
}
