//! Pipeline configuration.

use std::time::Duration;

use statsink_core::{AppError, AppResult};
use statsink_domain::BATCH_MAX_LIMIT;

use crate::retry::RetryPolicy;
use crate::validation_service::DEFAULT_MAX_FILE_SIZE_BYTES;

/// Tuning knobs for one pipeline instance.
///
/// Built once at process start from the environment and passed down by
/// constructor; there is no global registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    /// Rows per batch, at most [`BATCH_MAX_LIMIT`].
    pub batch_max: usize,
    /// Simultaneous workers per run.
    pub max_concurrency: usize,
    /// Tolerated failure percentage for the terminal gate.
    pub tolerated_failure_percentage: f64,
    /// Input size cap in bytes.
    pub max_file_size_bytes: u64,
    /// Run-level deadline.
    pub run_timeout: Duration,
    /// Per-batch worker deadline.
    pub batch_timeout: Duration,
    /// Map-level retries for retryable batch failures.
    pub max_map_retries: u32,
    /// In-worker retry policy for transient store failures.
    pub worker_retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_max: BATCH_MAX_LIMIT,
            max_concurrency: 5,
            tolerated_failure_percentage: 5.0,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            run_timeout: Duration::from_secs(600),
            batch_timeout: Duration::from_secs(30),
            max_map_retries: 2,
            worker_retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Validates the configuration bounds.
    pub fn validate(&self) -> AppResult<()> {
        if self.batch_max == 0 || self.batch_max > BATCH_MAX_LIMIT {
            return Err(AppError::Configuration(format!(
                "batch_max must be between 1 and {BATCH_MAX_LIMIT}, got {}",
                self.batch_max
            )));
        }

        if self.max_concurrency == 0 {
            return Err(AppError::Configuration(
                "max_concurrency must be greater than zero".to_owned(),
            ));
        }

        if !(0.0..=100.0).contains(&self.tolerated_failure_percentage) {
            return Err(AppError::Configuration(format!(
                "tolerated_failure_percentage must be between 0 and 100, got {}",
                self.tolerated_failure_percentage
            )));
        }

        if self.run_timeout.is_zero() || self.batch_timeout.is_zero() {
            return Err(AppError::Configuration(
                "run and batch timeouts must be greater than zero".to_owned(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::PipelineConfig;

    #[test]
    fn default_configuration_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let oversized_batch = PipelineConfig {
            batch_max: 26,
            ..PipelineConfig::default()
        };
        assert!(oversized_batch.validate().is_err());

        let no_concurrency = PipelineConfig {
            max_concurrency: 0,
            ..PipelineConfig::default()
        };
        assert!(no_concurrency.validate().is_err());

        let bad_tolerance = PipelineConfig {
            tolerated_failure_percentage: 101.0,
            ..PipelineConfig::default()
        };
        assert!(bad_tolerance.validate().is_err());
    }
}
