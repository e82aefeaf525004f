//! External wire contracts exchanged with the workflow orchestrator.
//!
//! These types mirror the orchestrator's JSON shapes, so they use
//! `camelCase` field names; everything internal stays `snake_case`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statsink_core::{AppError, AppResult};
use statsink_domain::{
    BATCH_MAX_LIMIT, BatchOutcome, RowBatch, RowFailure, RowOutcome, RowSuccess,
};

/// Execution descriptor inside the state-machine input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDescriptor {
    /// Orchestrator execution id.
    pub id: String,
    /// Execution start time.
    pub start_time: DateTime<Utc>,
}

/// Storage descriptor inside the state-machine input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageDescriptor {
    /// Input bucket.
    pub bucket: String,
    /// Input key.
    pub key: String,
    /// Input size in bytes.
    pub size: u64,
}

/// Processing knobs inside the state-machine input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingDescriptor {
    /// Parallel worker cap.
    pub max_concurrency: u32,
    /// Tolerated failure percentage for the terminal gate.
    pub tolerated_failure_percentage: f64,
}

/// State-machine input produced after the validation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMachineInput {
    /// Execution descriptor.
    pub execution: ExecutionDescriptor,
    /// Source object descriptor.
    pub s3: StorageDescriptor,
    /// Processing knobs.
    pub processing: ProcessingDescriptor,
}

/// Execution context handed to each worker invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    /// Orchestrator execution id, reused as the correlation id.
    pub execution_id: String,
    /// Dispatch time.
    pub timestamp: DateTime<Utc>,
}

/// Per-batch processing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingConfig {
    /// Whether conflicting writes are retried at the map level.
    pub retry_on_conflict: bool,
    /// Per-batch deadline in seconds.
    pub batch_timeout: u64,
    /// In-worker retry cap for transient store errors.
    pub max_retries: u32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            retry_on_conflict: true,
            batch_timeout: 30,
            max_retries: 3,
        }
    }
}

/// One row as carried by the worker input schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRow {
    /// Zero-based index among the file's data rows.
    pub row_index: u64,
    /// Subject user id.
    pub user_id: String,
    /// New authoritative login total.
    pub login_count: u64,
    /// New authoritative post total.
    pub post_count: u64,
}

/// Input for one worker invocation, supplied by the orchestrator's
/// parallel map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerBatchInput {
    /// Batch identifier.
    pub batch_id: String,
    /// Zero-based batch position.
    pub chunk_index: u32,
    /// Rows to process, in source order.
    pub items: Vec<WireRow>,
    /// Execution context.
    pub execution_context: ExecutionContext,
    /// Processing configuration.
    pub processing_config: ProcessingConfig,
}

impl WorkerBatchInput {
    /// Builds the worker input for one partitioned batch.
    #[must_use]
    pub fn from_batch(
        batch: &RowBatch,
        execution_context: ExecutionContext,
        processing_config: ProcessingConfig,
    ) -> Self {
        Self {
            batch_id: batch.batch_id.clone(),
            chunk_index: batch.chunk_index,
            items: batch
                .rows
                .iter()
                .map(|validated| WireRow {
                    row_index: validated.index,
                    user_id: validated.row.user_id.as_str().to_owned(),
                    login_count: validated.row.login_count,
                    post_count: validated.row.post_count,
                })
                .collect(),
            execution_context,
            processing_config,
        }
    }

    /// Validates the schema constraints.
    pub fn validate(&self) -> AppResult<()> {
        if self.items.is_empty() {
            return Err(AppError::Validation(
                "worker batch items must not be empty".to_owned(),
            ));
        }

        if self.items.len() > BATCH_MAX_LIMIT {
            return Err(AppError::Validation(format!(
                "worker batch items must not exceed {BATCH_MAX_LIMIT}, got {}",
                self.items.len()
            )));
        }

        Ok(())
    }
}

/// Output of one worker invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerBatchOutput {
    /// Batch identifier.
    pub batch_id: String,
    /// Zero-based batch position.
    pub chunk_index: u32,
    /// Rows processed.
    pub processed_count: u64,
    /// Rows applied.
    pub success_count: u64,
    /// Rows failed.
    pub error_count: u64,
    /// Wall-clock processing time in milliseconds.
    pub processing_time_ms: u64,
    /// Per-row successes.
    pub results: Vec<RowSuccess>,
    /// Per-row failures.
    pub errors: Vec<RowFailure>,
}

impl From<&BatchOutcome> for WorkerBatchOutput {
    fn from(outcome: &BatchOutcome) -> Self {
        let mut results = Vec::new();
        let mut errors = Vec::new();

        for row in &outcome.results {
            match row {
                RowOutcome::Success(success) => results.push(success.clone()),
                RowOutcome::Error(failure) => errors.push(failure.clone()),
            }
        }

        Self {
            batch_id: outcome.batch_id.clone(),
            chunk_index: outcome.chunk_index,
            processed_count: outcome.processed,
            success_count: outcome.succeeded,
            error_count: outcome.failed,
            processing_time_ms: outcome.wall_time_ms,
            results,
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use statsink_core::{AppResult, RunId};
    use statsink_domain::{StatsRow, ValidatedRow, partition_rows};

    use super::{ExecutionContext, ProcessingConfig, WorkerBatchInput};

    fn context() -> ExecutionContext {
        ExecutionContext {
            execution_id: "exec-1".to_owned(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn builds_worker_input_from_partitioned_batch() -> AppResult<()> {
        let run_id = RunId::new("stats-120000")?;
        let rows = vec![ValidatedRow {
            index: 0,
            row: StatsRow::parse("U00001", "12", "25")?,
        }];
        let batches = partition_rows(&run_id, rows, 25)?;

        let input =
            WorkerBatchInput::from_batch(&batches[0], context(), ProcessingConfig::default());

        input.validate()?;
        assert_eq!(input.batch_id, "stats-120000:0");
        assert_eq!(input.items.len(), 1);
        assert_eq!(input.items[0].user_id, "U00001");
        assert_eq!(input.items[0].row_index, 0);
        Ok(())
    }

    #[test]
    fn rejects_empty_and_oversized_batches() {
        let empty = WorkerBatchInput {
            batch_id: "b:0".to_owned(),
            chunk_index: 0,
            items: Vec::new(),
            execution_context: context(),
            processing_config: ProcessingConfig::default(),
        };
        assert!(empty.validate().is_err());

        let oversized = WorkerBatchInput {
            items: (0..26)
                .map(|index| super::WireRow {
                    row_index: index,
                    user_id: format!("U{index:05}"),
                    login_count: 1,
                    post_count: 1,
                })
                .collect(),
            ..empty
        };
        assert!(oversized.validate().is_err());
    }

    #[test]
    fn state_machine_input_parses_the_orchestrator_shape() -> AppResult<()> {
        let raw = serde_json::json!({
            "execution": { "id": "exec-9", "startTime": "2024-06-01T12:00:00Z" },
            "s3": { "bucket": "ingest-input", "key": "users.csv", "size": 2048 },
            "processing": { "maxConcurrency": 5, "toleratedFailurePercentage": 5.0 },
        });

        let input: super::StateMachineInput = serde_json::from_value(raw)
            .map_err(|error| statsink_core::AppError::Validation(error.to_string()))?;

        assert_eq!(input.execution.id, "exec-9");
        assert_eq!(input.s3.key, "users.csv");
        assert_eq!(input.processing.max_concurrency, 5);
        Ok(())
    }

    #[test]
    fn worker_output_splits_successes_and_errors() -> AppResult<()> {
        use statsink_domain::{
            BatchOutcome, ProcessingError, ProcessingErrorKind, RowFailure, RowOutcome,
            RowSuccess, StatsUserId,
        };

        let run_id = RunId::new("stats-120000")?;
        let outcome = BatchOutcome {
            batch_id: "stats-120000:0".to_owned(),
            run_id: run_id.clone(),
            chunk_index: 0,
            processed: 2,
            succeeded: 1,
            failed: 1,
            results: vec![
                RowOutcome::Success(RowSuccess {
                    row_index: 0,
                    user_id: StatsUserId::new("U00001")?,
                    previous_login_count: 0,
                    previous_post_count: 0,
                    new_login_count: 1,
                    new_post_count: 1,
                    replayed: false,
                }),
                RowOutcome::Error(RowFailure {
                    row_index: 1,
                    user_id: None,
                    error: ProcessingError::new(
                        ProcessingErrorKind::UserNotFound,
                        "user missing",
                    ),
                }),
            ],
            wall_time_ms: 42,
        };

        let output = super::WorkerBatchOutput::from(&outcome);
        assert_eq!(output.processed_count, 2);
        assert_eq!(output.results.len(), 1);
        assert_eq!(output.errors.len(), 1);
        assert_eq!(output.processing_time_ms, 42);
        Ok(())
    }

    #[test]
    fn worker_input_serializes_camel_case() -> AppResult<()> {
        let input = WorkerBatchInput {
            batch_id: "b:0".to_owned(),
            chunk_index: 0,
            items: vec![super::WireRow {
                row_index: 3,
                user_id: "U00001".to_owned(),
                login_count: 1,
                post_count: 2,
            }],
            execution_context: context(),
            processing_config: ProcessingConfig::default(),
        };

        let value = serde_json::to_value(&input)
            .map_err(|error| statsink_core::AppError::Internal(error.to_string()))?;
        assert!(value.get("batchId").is_some());
        assert!(value.get("chunkIndex").is_some());
        assert!(value["items"][0].get("rowIndex").is_some());
        assert!(value["processingConfig"].get("batchTimeout").is_some());
        Ok(())
    }
}
