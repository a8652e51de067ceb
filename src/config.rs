//! Execution configuration.
//!
//! [`ComputeConfig`] decides how many worker threads the host kernels use
//! and whether they run in parallel at all. Values come from code or from the
//! environment:
//!
//! - `EMBER_AI_THREADS`: positive worker count
//! - `EMBER_AI_SERIAL`: `1`/`true` forces the serial strategy
//!
//! # Example
//!
//! ```rust
//! use ember_ai::config::ComputeConfig;
//!
//! let cfg = ComputeConfig::default().with_threads(4);
//! assert_eq!(cfg.threads, 4);
//! ```

use crate::error::{Error, Result};

/// Environment variable overriding the worker count.
pub const THREADS_VAR: &str = "EMBER_AI_THREADS";

/// Environment variable forcing serial execution.
pub const SERIAL_VAR: &str = "EMBER_AI_SERIAL";

/// Worker pool settings for host kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeConfig {
    /// Number of pool workers, always at least 1.
    pub threads: usize,
    /// `false` selects the serial strategy regardless of `threads`.
    pub parallel: bool,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            threads,
            parallel: true,
        }
    }
}

impl ComputeConfig {
    /// Defaults overridden by `EMBER_AI_THREADS` and `EMBER_AI_SERIAL`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ComputeConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(raw) = lookup(THREADS_VAR) {
            let threads: usize = raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{THREADS_VAR}={raw:?} is not a number")))?;
            if threads == 0 {
                return Err(Error::Config(format!("{THREADS_VAR} must be positive")));
            }
            cfg.threads = threads;
        }

        if let Some(raw) = lookup(SERIAL_VAR) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => cfg.parallel = false,
                "0" | "false" | "no" | "" => {}
                other => {
                    return Err(Error::Config(format!(
                        "{SERIAL_VAR}={other:?} is not a boolean"
                    )));
                }
            }
        }

        if cfg.parallel && cfg.threads == 1 {
            log::warn!("{THREADS_VAR}=1 with parallel execution; a single worker will be used");
        }

        Ok(cfg)
    }

    /// Sets the worker count, clamped to at least 1.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Selects serial execution.
    pub fn serial(mut self) -> Self {
        self.parallel = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_parallel_with_workers() {
        let cfg = ComputeConfig::default();
        assert!(cfg.parallel);
        assert!(cfg.threads >= 1);
    }

    #[test]
    fn lookup_overrides() {
        let cfg = ComputeConfig::from_lookup(|key| match key {
            THREADS_VAR => Some("3".into()),
            SERIAL_VAR => Some("true".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.threads, 3);
        assert!(!cfg.parallel);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            ComputeConfig::from_lookup(|k| (k == THREADS_VAR).then(|| "zero".into())),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ComputeConfig::from_lookup(|k| (k == THREADS_VAR).then(|| "0".into())),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ComputeConfig::from_lookup(|k| (k == SERIAL_VAR).then(|| "maybe".into())),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn with_threads_clamps() {
        assert_eq!(ComputeConfig::default().with_threads(0).threads, 1);
    }
}
