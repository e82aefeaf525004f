//! Domain entities and invariants for the ingestion engine.

#![forbid(unsafe_code)]

mod aggregate;
mod audit;
mod batch;
mod error;
mod row;
mod run;
mod user;

pub use aggregate::{
    AggregatedResult, AggregatedTotals, BatchTimings, ERROR_RATE_RECOMMENDATION_THRESHOLD,
    ErrorFrequency, MapStatistics, SLOW_BATCH_THRESHOLD_MS, TOP_ERROR_LIMIT,
    build_aggregated_result,
};
pub use audit::{
    AUDIT_RETENTION_DAYS, AuditEntry, AuditEntryDraft, AuditEventType, AuditLevel,
};
pub use batch::{
    BATCH_MAX_LIMIT, BatchOutcome, RowBatch, RowFailure, RowOutcome, RowSuccess, partition_rows,
};
pub use error::{ErrorCategory, ProcessingError, ProcessingErrorKind};
pub use row::{StatsRow, StatsUserId, ValidatedRow};
pub use run::{Run, RunStatus, run_id_from_object_key};
pub use user::{StatisticsUpdate, UserAccount, UserStatistics};
