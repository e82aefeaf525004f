use async_trait::async_trait;
use chrono::{DateTime, Utc};
use statsink_core::{AppResult, RunId};
use statsink_domain::{Run, RunStatus};

/// Input for run creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRunInput {
    /// Derived run identifier.
    pub run_id: RunId,
    /// Source object reference (`bucket/key`).
    pub source_ref: String,
    /// Run start time.
    pub started_at: DateTime<Utc>,
}

/// Outcome of a conditional run creation.
#[derive(Debug, Clone, PartialEq)]
pub enum RunCreation {
    /// No run existed for the id; a new `running` row was created.
    Created(Run),
    /// A run already exists for the id; the existing row is untouched.
    Duplicate(Run),
}

/// Input for the terminal run update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteRunInput {
    /// Run to complete.
    pub run_id: RunId,
    /// Terminal status.
    pub status: RunStatus,
    /// Final row total.
    pub total_rows: u64,
    /// Final success count.
    pub success_count: u64,
    /// Final error count.
    pub error_count: u64,
    /// Run end time.
    pub ended_at: DateTime<Utc>,
    /// Reference to the aggregated artifact.
    pub output_ref: Option<String>,
}

/// Repository port for the per-run metadata row.
///
/// All writes are conditional: creation only when absent, completion only
/// while the run is still `running`. A terminal status never changes.
#[async_trait]
pub trait RunMetadataRepository: Send + Sync {
    /// Creates the run row unless one already exists.
    async fn try_create_run(&self, input: CreateRunInput) -> AppResult<RunCreation>;

    /// Returns one run by id.
    async fn find_run(&self, run_id: &RunId) -> AppResult<Option<Run>>;

    /// Records the validated row total for an in-flight run.
    async fn set_total_rows(&self, run_id: &RunId, total_rows: u64) -> AppResult<()>;

    /// Adds per-batch progress to the run counters.
    async fn record_progress(&self, run_id: &RunId, succeeded: u64, failed: u64) -> AppResult<()>;

    /// Writes the terminal state.
    ///
    /// When the run is already terminal the stored row wins and is
    /// returned unchanged, which keeps aggregation replays idempotent.
    async fn complete_run(&self, input: CompleteRunInput) -> AppResult<Run>;

    /// Lists recent runs, newest first.
    async fn list_recent_runs(&self, limit: usize) -> AppResult<Vec<Run>>;
}
