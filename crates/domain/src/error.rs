//! Classified processing errors.
//!
//! Row-level failures are data, not exceptions: each failed row carries a
//! [`ProcessingError`] inside its batch outcome and surfaces in the
//! aggregated result. Only systemic failures propagate as
//! `statsink_core::AppError`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use statsink_core::AppError;

/// Broad error taxon used for reporting and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Data-level failures; the row is skipped and the run continues.
    Business,
    /// Engine-level failures inside the processing pipeline.
    System,
    /// External store and service failures.
    Infrastructure,
}

/// Classified kind of a per-row or per-batch processing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingErrorKind {
    /// Input value failed a validation rule.
    Validation,
    /// Malformed CSV structure (column count, unparsable cell).
    CsvFormat,
    /// Input is not valid UTF-8.
    InvalidEncoding,
    /// Header row does not match the expected column set.
    InvalidHeader,
    /// Input object exceeds the size cap.
    FileTooLarge,
    /// Input object does not exist.
    FileNotFound,
    /// Referenced user does not exist in the relational store.
    UserNotFound,
    /// New statistics would decrease a monotonic counter.
    InvalidStatistics,
    /// A domain business rule rejected the update.
    BusinessRuleViolation,
    /// A configured threshold was exceeded.
    ThresholdExceeded,
    /// Duplicate submission detected.
    Duplicate,
    /// Row or batch processing exceeded its deadline.
    ProcessingTimeout,
    /// Concurrency limit prevented processing.
    ConcurrencyLimit,
    /// Stored data violates an integrity expectation.
    DataIntegrity,
    /// Missing or malformed configuration.
    Configuration,
    /// Relational store connection, timeout, or throttle failure.
    DatabaseConnection,
    /// Object storage access failure.
    StorageAccess,
    /// Key-value store access failure.
    KeyValueAccess,
    /// Downstream external service failure.
    ExternalService,
}

impl ProcessingErrorKind {
    /// Returns the stable error code string.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::CsvFormat => "CSV_FORMAT_ERROR",
            Self::InvalidEncoding => "INVALID_ENCODING",
            Self::InvalidHeader => "INVALID_HEADER",
            Self::FileTooLarge => "FILE_TOO_LARGE",
            Self::FileNotFound => "FILE_NOT_FOUND",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::InvalidStatistics => "INVALID_STATISTICS",
            Self::BusinessRuleViolation => "BUSINESS_RULE_VIOLATION",
            Self::ThresholdExceeded => "THRESHOLD_EXCEEDED",
            Self::Duplicate => "DUPLICATE_ERROR",
            Self::ProcessingTimeout => "PROCESSING_TIMEOUT",
            Self::ConcurrencyLimit => "CONCURRENCY_LIMIT",
            Self::DataIntegrity => "DATA_INTEGRITY",
            Self::Configuration => "CONFIGURATION_ERROR",
            Self::DatabaseConnection => "DATABASE_CONNECTION_ERROR",
            Self::StorageAccess => "STORAGE_ACCESS_ERROR",
            Self::KeyValueAccess => "KEY_VALUE_ACCESS_ERROR",
            Self::ExternalService => "EXTERNAL_SERVICE_ERROR",
        }
    }

    /// Returns the error taxon this kind belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation
            | Self::CsvFormat
            | Self::InvalidEncoding
            | Self::InvalidHeader
            | Self::FileTooLarge
            | Self::FileNotFound
            | Self::UserNotFound
            | Self::InvalidStatistics
            | Self::BusinessRuleViolation
            | Self::ThresholdExceeded
            | Self::Duplicate => ErrorCategory::Business,
            Self::ProcessingTimeout
            | Self::ConcurrencyLimit
            | Self::DataIntegrity
            | Self::Configuration => ErrorCategory::System,
            Self::DatabaseConnection
            | Self::StorageAccess
            | Self::KeyValueAccess
            | Self::ExternalService => ErrorCategory::Infrastructure,
        }
    }

    /// Returns whether a retry of the same operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.category() {
            ErrorCategory::Business => false,
            ErrorCategory::System => {
                matches!(self, Self::ProcessingTimeout | Self::ConcurrencyLimit)
            }
            ErrorCategory::Infrastructure => true,
        }
    }

    /// Returns the HTTP-ish status code for external surfaces.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation | Self::CsvFormat | Self::InvalidEncoding | Self::InvalidHeader => 400,
            Self::UserNotFound | Self::FileNotFound => 404,
            Self::Duplicate => 409,
            Self::FileTooLarge => 413,
            Self::InvalidStatistics | Self::BusinessRuleViolation | Self::ThresholdExceeded => 422,
            Self::ConcurrencyLimit | Self::DatabaseConnection => 503,
            Self::ProcessingTimeout => 504,
            Self::DataIntegrity | Self::Configuration => 500,
            Self::StorageAccess | Self::KeyValueAccess | Self::ExternalService => 502,
        }
    }
}

/// One classified processing failure with reporting context.
///
/// Stack traces stay in internal logs; this is the externally visible
/// shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingError {
    /// Classified failure kind.
    pub kind: ProcessingErrorKind,
    /// Human-readable failure message.
    pub message: String,
    /// Correlation identifier linking related records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Failure time.
    pub timestamp: DateTime<Utc>,
    /// Structured failure context.
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub metadata: Value,
}

impl ProcessingError {
    /// Creates a classified error stamped with the current time.
    #[must_use]
    pub fn new(kind: ProcessingErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            correlation_id: None,
            timestamp: Utc::now(),
            metadata: Value::Null,
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

    /// Returns the stable error code string.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Classifies a systemic application error into a processing error.
    ///
    /// Used after in-worker retry exhaustion to fold store failures into
    /// the batch outcome instead of failing the whole batch.
    #[must_use]
    pub fn from_app_error(error: &AppError) -> Self {
        let kind = match error {
            AppError::Validation(_) => ProcessingErrorKind::Validation,
            AppError::NotFound(_) => ProcessingErrorKind::UserNotFound,
            AppError::Conflict(_) => ProcessingErrorKind::Duplicate,
            AppError::Configuration(_) => ProcessingErrorKind::Configuration,
            AppError::Timeout(_) => ProcessingErrorKind::ProcessingTimeout,
            AppError::Storage(_) => ProcessingErrorKind::StorageAccess,
            AppError::KeyValue(_) => ProcessingErrorKind::KeyValueAccess,
            AppError::Database(_) => ProcessingErrorKind::DatabaseConnection,
            AppError::Internal(_) => ProcessingErrorKind::DataIntegrity,
        };

        Self::new(kind, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use statsink_core::AppError;

    use super::{ErrorCategory, ProcessingError, ProcessingErrorKind};

    #[test]
    fn business_errors_are_not_retryable() {
        assert!(!ProcessingErrorKind::UserNotFound.is_retryable());
        assert!(!ProcessingErrorKind::InvalidStatistics.is_retryable());
        assert_eq!(
            ProcessingErrorKind::UserNotFound.category(),
            ErrorCategory::Business
        );
    }

    #[test]
    fn timeouts_are_retryable_system_errors() {
        assert!(ProcessingErrorKind::ProcessingTimeout.is_retryable());
        assert_eq!(
            ProcessingErrorKind::ProcessingTimeout.category(),
            ErrorCategory::System
        );
        assert!(!ProcessingErrorKind::DataIntegrity.is_retryable());
    }

    #[test]
    fn infrastructure_errors_are_retryable() {
        assert!(ProcessingErrorKind::DatabaseConnection.is_retryable());
        assert!(ProcessingErrorKind::StorageAccess.is_retryable());
        assert!(ProcessingErrorKind::KeyValueAccess.is_retryable());
    }

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(ProcessingErrorKind::Validation.status_code(), 400);
        assert_eq!(ProcessingErrorKind::UserNotFound.status_code(), 404);
        assert_eq!(ProcessingErrorKind::FileTooLarge.status_code(), 413);
        assert_eq!(ProcessingErrorKind::InvalidStatistics.status_code(), 422);
        assert_eq!(ProcessingErrorKind::ProcessingTimeout.status_code(), 504);
        assert_eq!(ProcessingErrorKind::DatabaseConnection.status_code(), 503);
        assert_eq!(ProcessingErrorKind::StorageAccess.status_code(), 502);
    }

    #[test]
    fn app_errors_classify_into_processing_errors() {
        let error = ProcessingError::from_app_error(&AppError::Database("pool timeout".to_owned()));
        assert_eq!(error.kind, ProcessingErrorKind::DatabaseConnection);
        assert_eq!(error.code(), "DATABASE_CONNECTION_ERROR");
        assert!(error.kind.is_retryable());
    }
}
