//! Append-only audit events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use statsink_core::{AppError, AppResult, RunId};

/// Default audit retention window in days.
pub const AUDIT_RETENTION_DAYS: i64 = 90;

/// Severity of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditLevel {
    /// Diagnostic detail.
    Debug,
    /// Expected lifecycle event.
    Info,
    /// Recoverable anomaly.
    Warn,
    /// Failed operation.
    Error,
}

impl AuditLevel {
    /// Returns the stable level string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }

    /// Parses a stable level string.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            other => Err(AppError::Validation(format!(
                "unknown audit level '{other}'"
            ))),
        }
    }
}

/// Kind of a recorded audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    /// A run was accepted and started.
    RunStarted,
    /// Input validation finished.
    ValidationCompleted,
    /// Input validation failed and short-circuited the run.
    ValidationFailed,
    /// A worker started one batch.
    BatchStarted,
    /// A worker finished one batch.
    BatchCompleted,
    /// One per-row user statistics update.
    UserUpdate,
    /// Terminal marker for a successful run.
    RunCompleted,
    /// Terminal marker for a failed run.
    RunFailed,
}

impl AuditEventType {
    /// Returns the stable event type string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "RUN_STARTED",
            Self::ValidationCompleted => "VALIDATION_COMPLETED",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::BatchStarted => "BATCH_STARTED",
            Self::BatchCompleted => "BATCH_COMPLETED",
            Self::UserUpdate => "USER_UPDATE",
            Self::RunCompleted => "RUN_COMPLETED",
            Self::RunFailed => "RUN_FAILED",
        }
    }
}

/// One append-only audit record.
///
/// Identity is `(run_id, timestamp, sequence)`; the repository assigns
/// `sequence` and `retention_until` at write time. Never mutated after the
/// write; removed only by retention expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Owning run.
    pub run_id: RunId,
    /// Event time.
    pub timestamp: DateTime<Utc>,
    /// Per-run monotonic sequence assigned by the store.
    pub sequence: u64,
    /// Event kind.
    pub event_type: AuditEventType,
    /// Event severity.
    pub level: AuditLevel,
    /// Emitting component name.
    pub function_name: String,
    /// Human-readable description.
    pub message: String,
    /// Structured event context.
    pub metadata: Value,
    /// Correlation identifier linking related records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Source-file row index for `USER_UPDATE` events; part of the
    /// idempotence key `(run_id, row_index)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_index: Option<u64>,
    /// Retention horizon; the store may delete the entry afterwards.
    pub retention_until: DateTime<Utc>,
}

/// One audit record as submitted by services, before the store assigns
/// sequence and retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntryDraft {
    /// Owning run.
    pub run_id: RunId,
    /// Event time.
    pub timestamp: DateTime<Utc>,
    /// Event kind.
    pub event_type: AuditEventType,
    /// Event severity.
    pub level: AuditLevel,
    /// Emitting component name.
    pub function_name: String,
    /// Human-readable description.
    pub message: String,
    /// Structured event context.
    pub metadata: Value,
    /// Correlation identifier linking related records.
    pub correlation_id: Option<String>,
    /// Source-file row index for `USER_UPDATE` events.
    pub row_index: Option<u64>,
}

impl AuditEntryDraft {
    /// Creates a draft stamped with the current time.
    #[must_use]
    pub fn new(
        run_id: RunId,
        event_type: AuditEventType,
        level: AuditLevel,
        function_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            timestamp: Utc::now(),
            event_type,
            level,
            function_name: function_name.into(),
            message: message.into(),
            metadata: Value::Null,
            correlation_id: None,
            row_index: None,
        }
    }

    /// Attaches structured metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attaches a correlation identifier.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Attaches the source-file row index.
    #[must_use]
    pub fn with_row_index(mut self, row_index: u64) -> Self {
        self.row_index = Some(row_index);
        self
    }
}
