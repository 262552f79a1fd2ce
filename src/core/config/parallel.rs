//! Parallel processing configuration for the orchestrator side of a run.
//!
//! Workers are single-threaded for inference; rayon is only used for
//! CPU-bound bookkeeping such as sniffing file types during discovery and
//! encoding overlay images.

use serde::{Deserialize, Serialize};

/// Controls how much rayon parallelism a run may use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelPolicy {
    /// Maximum number of threads in the global rayon pool.
    /// If None, rayon picks its default (number of logical CPUs).
    #[serde(default)]
    pub max_threads: Option<usize>,

    /// Candidate files at or below this count are sniffed sequentially.
    #[serde(default = "ParallelPolicy::default_sniff_threshold")]
    pub sniff_threshold: usize,
}

impl ParallelPolicy {
    /// Create a new ParallelPolicy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of threads.
    pub fn with_max_threads(mut self, max_threads: Option<usize>) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Set the sequential sniffing threshold.
    pub fn with_sniff_threshold(mut self, threshold: usize) -> Self {
        self.sniff_threshold = threshold;
        self
    }

    /// Whether `count` items should be handled with rayon.
    pub fn should_parallelize(&self, count: usize) -> bool {
        count > self.sniff_threshold
    }

    /// Install the global rayon thread pool with the configured number of threads.
    ///
    /// Must run once, before any parallel work.
    ///
    /// # Returns
    ///
    /// - `Ok(true)` if the thread pool was configured
    /// - `Ok(false)` if `max_threads` is None
    /// - `Err` if the global pool was already initialized
    pub fn install_global_thread_pool(&self) -> Result<bool, rayon::ThreadPoolBuildError> {
        if let Some(num_threads) = self.max_threads {
            rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build_global()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn default_sniff_threshold() -> usize {
        16
    }
}

impl Default for ParallelPolicy {
    fn default() -> Self {
        Self {
            max_threads: None,
            sniff_threshold: Self::default_sniff_threshold(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallel_policy_defaults_from_empty_json() {
        let policy: ParallelPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy.max_threads, None);
        assert_eq!(policy.sniff_threshold, 16);
        assert!(!policy.should_parallelize(16));
        assert!(policy.should_parallelize(17));
    }

    #[test]
    fn test_parallel_policy_without_threads_skips_pool() {
        let policy = ParallelPolicy::new().with_sniff_threshold(0);
        assert_eq!(policy.install_global_thread_pool().unwrap(), false);
        assert!(policy.should_parallelize(1));
    }
}
