//! CSV validation: fetch, decode, header and per-row checks.

use std::sync::Arc;

use chrono::Utc;
use csv::ReaderBuilder;
use serde_json::json;
use statsink_core::{AppError, AppResult, RunId};
use statsink_domain::{
    AuditEntryDraft, AuditEventType, AuditLevel, ProcessingError, ProcessingErrorKind, RowFailure,
    StatsRow, ValidatedRow,
};

use crate::ingest_ports::{AuditRepository, ObjectStore};

/// Default input size cap.
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 100 * 1024 * 1024;

/// Expected header columns, order-sensitive, with accepted Japanese
/// aliases per position.
const EXPECTED_HEADERS: [[&str; 2]; 3] = [
    ["user_id", "ユーザーID"],
    ["login_count", "ログイン回数"],
    ["post_count", "投稿回数"],
];

/// File-level statistics captured during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationStatistics {
    /// Number of data rows in the file, valid or not.
    pub row_count: u64,
    /// File size in bytes.
    pub file_size: u64,
    /// Detected encoding.
    pub encoding: String,
}

/// Result of validating one input object.
///
/// `valid` reflects only the file-level checks (presence, size, encoding,
/// header): a malformed data row never aborts validation. Row failures
/// are collected in `row_failures` and surface downstream in the
/// aggregated result.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    /// Whether the file-level checks passed.
    pub valid: bool,
    /// Rows that passed every rule, in file order.
    pub rows: Vec<ValidatedRow>,
    /// Rows rejected by a row rule, with their file positions.
    pub row_failures: Vec<RowFailure>,
    /// Fatal file-level errors; empty when `valid`.
    pub errors: Vec<ProcessingError>,
    /// File-level statistics.
    pub statistics: ValidationStatistics,
}

/// CSV validator.
pub struct CsvValidator {
    object_store: Arc<dyn ObjectStore>,
    audit: Arc<dyn AuditRepository>,
    max_file_size_bytes: u64,
}

impl CsvValidator {
    /// Creates the validator.
    #[must_use]
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        audit: Arc<dyn AuditRepository>,
        max_file_size_bytes: u64,
    ) -> Self {
        Self {
            object_store,
            audit,
            max_file_size_bytes,
        }
    }

    /// Validates one input object.
    ///
    /// File-level failures (missing object, oversize, encoding, header)
    /// produce an invalid result; storage access failures propagate so the
    /// orchestrator can retry them.
    pub async fn validate(
        &self,
        bucket: &str,
        key: &str,
        run_id: &RunId,
    ) -> AppResult<ValidationResult> {
        let payload = match self.object_store.get_object(bucket, key).await {
            Ok(payload) => payload,
            Err(AppError::NotFound(message)) => {
                return self
                    .fail(
                        run_id,
                        0,
                        ProcessingError::new(ProcessingErrorKind::FileNotFound, message),
                    )
                    .await;
            }
            Err(error) => return Err(error),
        };

        if payload.size > self.max_file_size_bytes {
            let error = ProcessingError::new(
                ProcessingErrorKind::FileTooLarge,
                format!(
                    "object '{bucket}/{key}' is {} bytes, cap is {}",
                    payload.size, self.max_file_size_bytes
                ),
            );
            return self.fail(run_id, payload.size, error).await;
        }

        let file_size = payload.size;
        let text = match String::from_utf8(payload.bytes) {
            Ok(text) => text,
            Err(error) => {
                let error = ProcessingError::new(
                    ProcessingErrorKind::InvalidEncoding,
                    format!("object '{bucket}/{key}' is not valid UTF-8: {error}"),
                );
                return self.fail(run_id, file_size, error).await;
            }
        };
        let text = text.strip_prefix('\u{feff}').unwrap_or(text.as_str());

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|error| AppError::Validation(format!("failed to read CSV header: {error}")))?
            .clone();

        if let Some(error) = header_mismatch(&headers) {
            return self.fail(run_id, file_size, error).await;
        }

        let mut rows = Vec::new();
        let mut row_failures = Vec::new();
        let mut index: u64 = 0;

        for record in reader.records() {
            let row_index = index;
            index += 1;

            let record = match record {
                Ok(record) => record,
                Err(error) => {
                    row_failures.push(row_failure(
                        row_index,
                        None,
                        ProcessingErrorKind::CsvFormat,
                        format!("unreadable CSV record: {error}"),
                    ));
                    continue;
                }
            };

            if record.len() != EXPECTED_HEADERS.len() {
                row_failures.push(row_failure(
                    row_index,
                    record.get(0).map(str::to_owned),
                    ProcessingErrorKind::CsvFormat,
                    format!(
                        "expected {} columns, got {}",
                        EXPECTED_HEADERS.len(),
                        record.len()
                    ),
                ));
                continue;
            }

            let user_id = record.get(0).unwrap_or_default();
            let login_count = record.get(1).unwrap_or_default();
            let post_count = record.get(2).unwrap_or_default();

            match StatsRow::parse(user_id, login_count, post_count) {
                Ok(row) => rows.push(ValidatedRow {
                    index: row_index,
                    row,
                }),
                Err(error) => {
                    row_failures.push(row_failure(
                        row_index,
                        Some(user_id.trim().to_owned()),
                        ProcessingErrorKind::Validation,
                        error.to_string(),
                    ));
                }
            }
        }

        let statistics = ValidationStatistics {
            row_count: index,
            file_size,
            encoding: "utf-8".to_owned(),
        };

        self.audit
            .append_entry(
                AuditEntryDraft::new(
                    run_id.clone(),
                    AuditEventType::ValidationCompleted,
                    AuditLevel::Info,
                    "csv_validator",
                    format!(
                        "validated {} data rows ({} rejected)",
                        statistics.row_count,
                        row_failures.len()
                    ),
                )
                .with_metadata(json!({
                    "row_count": statistics.row_count,
                    "rejected_rows": row_failures.len(),
                    "file_size": statistics.file_size,
                    "encoding": statistics.encoding,
                })),
            )
            .await?;

        Ok(ValidationResult {
            valid: true,
            rows,
            row_failures,
            errors: Vec::new(),
            statistics,
        })
    }

    async fn fail(
        &self,
        run_id: &RunId,
        file_size: u64,
        error: ProcessingError,
    ) -> AppResult<ValidationResult> {
        self.audit
            .append_entry(
                AuditEntryDraft::new(
                    run_id.clone(),
                    AuditEventType::ValidationFailed,
                    AuditLevel::Error,
                    "csv_validator",
                    error.message.clone(),
                )
                .with_metadata(json!({ "code": error.code() })),
            )
            .await?;

        Ok(ValidationResult {
            valid: false,
            rows: Vec::new(),
            row_failures: Vec::new(),
            errors: vec![error],
            statistics: ValidationStatistics {
                row_count: 0,
                file_size,
                encoding: "utf-8".to_owned(),
            },
        })
    }
}

fn header_mismatch(headers: &csv::StringRecord) -> Option<ProcessingError> {
    let found: Vec<&str> = headers.iter().map(str::trim).collect();

    let matches = found.len() == EXPECTED_HEADERS.len()
        && EXPECTED_HEADERS
            .iter()
            .zip(found.iter())
            .all(|(accepted, column)| accepted.contains(column));

    if matches {
        return None;
    }

    Some(
        ProcessingError::new(
            ProcessingErrorKind::InvalidHeader,
            format!(
                "header must be '{}', got '{}'",
                EXPECTED_HEADERS
                    .iter()
                    .map(|accepted| accepted[0])
                    .collect::<Vec<_>>()
                    .join(","),
                found.join(",")
            ),
        )
        .with_metadata(json!({ "found": found })),
    )
}

fn row_failure(
    row_index: u64,
    user_id: Option<String>,
    kind: ProcessingErrorKind,
    message: String,
) -> RowFailure {
    RowFailure {
        row_index,
        user_id: user_id.filter(|value| !value.is_empty()),
        error: ProcessingError {
            kind,
            message,
            correlation_id: None,
            timestamp: Utc::now(),
            metadata: json!({ "row_index": row_index }),
        },
    }
}
