//! Batch partitioning and per-batch outcomes.

use serde::{Deserialize, Serialize};
use statsink_core::{AppError, AppResult, RunId};

use crate::error::ProcessingError;
use crate::row::{StatsUserId, ValidatedRow};

/// Hard upper bound on batch size, matching the downstream bulk-write
/// limit of the key-value store.
pub const BATCH_MAX_LIMIT: usize = 25;

/// One slice of validated rows handed to a single worker invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowBatch {
    /// Stable batch identifier (`<run_id>:<chunk_index>`).
    pub batch_id: String,
    /// Zero-based position of this batch among the run's batches.
    pub chunk_index: u32,
    /// Rows in source-file order.
    pub rows: Vec<ValidatedRow>,
}

/// Splits validated rows into batches of at most `batch_max` rows.
///
/// Row order is preserved within and across batches; `chunk_index` starts
/// at zero; empty input yields zero batches. `batch_max` must be between
/// 1 and [`BATCH_MAX_LIMIT`].
pub fn partition_rows(
    run_id: &RunId,
    rows: Vec<ValidatedRow>,
    batch_max: usize,
) -> AppResult<Vec<RowBatch>> {
    if batch_max == 0 {
        return Err(AppError::Validation(
            "batch_max must be greater than zero".to_owned(),
        ));
    }

    if batch_max > BATCH_MAX_LIMIT {
        return Err(AppError::Validation(format!(
            "batch_max must not exceed {BATCH_MAX_LIMIT}, got {batch_max}"
        )));
    }

    let mut batches = Vec::with_capacity(rows.len().div_ceil(batch_max));
    let mut remaining = rows.into_iter().peekable();
    let mut chunk_index: u32 = 0;

    while remaining.peek().is_some() {
        let chunk: Vec<ValidatedRow> = remaining.by_ref().take(batch_max).collect();
        batches.push(RowBatch {
            batch_id: format!("{run_id}:{chunk_index}"),
            chunk_index,
            rows: chunk,
        });
        chunk_index = chunk_index.saturating_add(1);
    }

    Ok(batches)
}

/// Successful outcome for one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSuccess {
    /// Source-file row index.
    pub row_index: u64,
    /// Subject user.
    pub user_id: StatsUserId,
    /// Login total before the update.
    pub previous_login_count: u64,
    /// Post total before the update.
    pub previous_post_count: u64,
    /// Login total after the update.
    pub new_login_count: u64,
    /// Post total after the update.
    pub new_post_count: u64,
    /// Whether the row was a replay no-op (new equals current).
    pub replayed: bool,
}

/// Failed outcome for one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowFailure {
    /// Source-file row index.
    pub row_index: u64,
    /// Subject user id when the row parsed far enough to know it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Classified failure.
    pub error: ProcessingError,
}

/// Outcome of one row within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowOutcome {
    /// Row applied (or replay no-op).
    Success(RowSuccess),
    /// Row failed with a classified error.
    Error(RowFailure),
}

impl RowOutcome {
    /// Returns the source-file row index.
    #[must_use]
    pub fn row_index(&self) -> u64 {
        match self {
            Self::Success(success) => success.row_index,
            Self::Error(failure) => failure.row_index,
        }
    }
}

/// Result of one worker invocation over one batch.
///
/// Carries exactly one entry in `results` per input row; produced by a
/// worker, consumed by the aggregator, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Batch identifier.
    pub batch_id: String,
    /// Owning run.
    pub run_id: RunId,
    /// Zero-based batch position.
    pub chunk_index: u32,
    /// Number of rows processed (always the batch size).
    pub processed: u64,
    /// Number of successful rows.
    pub succeeded: u64,
    /// Number of failed rows.
    pub failed: u64,
    /// Per-row outcomes in batch order.
    pub results: Vec<RowOutcome>,
    /// Wall-clock processing time in milliseconds.
    pub wall_time_ms: u64,
}

impl BatchOutcome {
    /// Iterates over the failed rows.
    pub fn failures(&self) -> impl Iterator<Item = &RowFailure> {
        self.results.iter().filter_map(|outcome| match outcome {
            RowOutcome::Error(failure) => Some(failure),
            RowOutcome::Success(_) => None,
        })
    }

    /// Checks the per-batch counter invariant.
    #[must_use]
    pub fn counters_consistent(&self) -> bool {
        self.succeeded.saturating_add(self.failed) == self.processed
            && self.processed == self.results.len() as u64
    }
}
