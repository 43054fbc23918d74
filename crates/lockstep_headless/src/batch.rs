//! Batch determinism runs.
//!
//! Runs the same session many times in parallel using rayon and checks
//! that every run ends in the same state.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::metrics::GameMetrics;
use crate::runner::{run_session, RunConfig};
use crate::scenario::Scenario;

/// Configuration for a batch run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of runs
    pub runs: u32,
    /// Ticks per run
    pub ticks: u64,
    /// Maximum parallel runs (0 = use rayon default)
    pub parallel: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            runs: 8,
            ticks: 2_400,
            parallel: 0,
        }
    }
}

impl BatchConfig {
    /// Create config for `runs` runs of `ticks` ticks
    #[must_use]
    pub fn new(runs: u32, ticks: u64) -> Self {
        Self {
            runs,
            ticks,
            ..Default::default()
        }
    }

    /// Limit the number of worker threads
    #[must_use]
    pub fn with_parallel(mut self, parallel: u32) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Error during batch run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchError {
    /// Run index
    pub run: u32,
    /// Error message
    pub message: String,
}

/// Results from a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResults {
    /// Configuration used
    pub config: BatchConfig,
    /// Final state hash of each successful run, in run order
    pub hashes: Vec<u64>,
    /// Whether every run ended with the same hash
    pub deterministic: bool,
    /// Metrics of the first run
    pub sample: Option<GameMetrics>,
    /// Total runtime
    pub duration_seconds: f64,
    /// Errors encountered
    pub errors: Vec<BatchError>,
}

impl BatchResults {
    /// Distinct final hashes; one for a deterministic batch
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }
}

/// Run a batch of identical sessions
pub fn run_batch(scenario: &Scenario, config: BatchConfig) -> BatchResults {
    let start = Instant::now();
    let completed = AtomicU32::new(0);

    info!(runs = config.runs, ticks = config.ticks, "starting batch");

    let pool = if config.parallel > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.parallel as usize)
            .build()
            .map_err(|e| warn!(error = %e, "thread pool unavailable, using the global one"))
            .ok()
    } else {
        None
    };

    let run_config = RunConfig::new(config.ticks);
    let job = || -> Vec<(u32, Result<GameMetrics, String>)> {
        (0..config.runs)
            .into_par_iter()
            .map(|i| {
                let result = run_session(scenario, &run_config).map_err(|e| e.to_string());
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(run = i, done, total = config.runs, "run finished");
                (i, result)
            })
            .collect()
    };
    let results = match &pool {
        Some(pool) => pool.install(job),
        None => job(),
    };

    let mut hashes = Vec::new();
    let mut sample = None;
    let mut errors = Vec::new();
    for (run, result) in results {
        match result {
            Ok(metrics) => {
                hashes.push(metrics.final_state_hash);
                sample.get_or_insert(metrics);
            }
            Err(message) => {
                warn!(run, %message, "run failed");
                errors.push(BatchError { run, message });
            }
        }
    }

    let deterministic = errors.is_empty() && hashes.windows(2).all(|w| w[0] == w[1]);
    let duration_seconds = start.elapsed().as_secs_f64();
    if deterministic {
        info!(runs = hashes.len(), duration_seconds, "batch complete, all hashes agree");
    } else {
        warn!(runs = hashes.len(), errors = errors.len(), "batch complete, runs disagree");
    }

    BatchResults {
        config,
        hashes,
        deterministic,
        sample,
        duration_seconds,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::default_content_dir;

    #[test]
    fn test_batch_config_builder() {
        let config = BatchConfig::new(4, 100).with_parallel(2);
        assert_eq!(config.runs, 4);
        assert_eq!(config.ticks, 100);
        assert_eq!(config.parallel, 2);
        assert_eq!(BatchConfig::default().runs, 8);
    }

    #[test]
    fn test_parallel_runs_agree() {
        let scenario = Scenario::load(default_content_dir()).unwrap();
        let results = run_batch(&scenario, BatchConfig::new(4, 300).with_parallel(2));

        assert_eq!(results.hashes.len(), 4);
        assert!(results.errors.is_empty());
        assert!(results.deterministic);
        assert_eq!(results.unique_hashes().len(), 1);
        assert_eq!(results.sample.unwrap().duration_ticks, 300);
    }

    #[test]
    fn test_results_serialize() {
        let results = BatchResults {
            config: BatchConfig::default(),
            hashes: vec![3, 3],
            deterministic: true,
            sample: None,
            duration_seconds: 0.5,
            errors: vec![],
        };
        let json = serde_json::to_string_pretty(&results).unwrap();
        assert!(json.contains("\"deterministic\": true"));
    }
}
