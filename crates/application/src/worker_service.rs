//! Per-batch worker: one transactional monotonic update per row.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use statsink_core::{AppResult, RunId};
use statsink_domain::{
    AuditEntryDraft, AuditEventType, AuditLevel, BatchOutcome, ProcessingError,
    ProcessingErrorKind, RowFailure, RowOutcome, RowSuccess, StatsRow,
};
use tracing::warn;

use crate::contracts::{WireRow, WorkerBatchInput};
use crate::ingest_ports::{
    ApplyStatisticsInput, AuditRepository, RunMetadataRepository, StatisticsApplyOutcome,
    UserStatisticsRepository,
};
use crate::retry::{RetryPolicy, retry_transient};

/// Per-batch worker.
///
/// Rows are processed sequentially; each row runs one transactional
/// update against the relational store and appends one audit entry. Row
/// failures are data in the batch outcome; only store failures on the
/// audit path escape as errors, and those are safe to replay because the
/// relational update is monotonic and the audit append is keyed on
/// `(run_id, row_index)`.
pub struct BatchWorker {
    users: Arc<dyn UserStatisticsRepository>,
    audit: Arc<dyn AuditRepository>,
    run_metadata: Arc<dyn RunMetadataRepository>,
    retry: RetryPolicy,
}

impl BatchWorker {
    /// Creates the worker.
    #[must_use]
    pub fn new(
        users: Arc<dyn UserStatisticsRepository>,
        audit: Arc<dyn AuditRepository>,
        run_metadata: Arc<dyn RunMetadataRepository>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            users,
            audit,
            run_metadata,
            retry,
        }
    }

    /// Processes one batch and returns one outcome entry per input row.
    pub async fn process_batch(
        &self,
        run_id: &RunId,
        input: &WorkerBatchInput,
    ) -> AppResult<BatchOutcome> {
        input.validate()?;

        let retry = RetryPolicy {
            max_attempts: input.processing_config.max_retries.max(1),
            ..self.retry
        };
        let correlation_id = input.execution_context.execution_id.as_str();

        self.audit
            .append_entry(
                AuditEntryDraft::new(
                    run_id.clone(),
                    AuditEventType::BatchStarted,
                    AuditLevel::Debug,
                    "batch_worker",
                    format!("batch '{}' started", input.batch_id),
                )
                .with_metadata(json!({
                    "batch_id": input.batch_id,
                    "chunk_index": input.chunk_index,
                    "items": input.items.len(),
                }))
                .with_correlation_id(correlation_id),
            )
            .await?;

        let started = Instant::now();
        let mut results = Vec::with_capacity(input.items.len());
        let mut succeeded: u64 = 0;
        let mut failed: u64 = 0;

        for item in &input.items {
            let outcome = self
                .process_row(run_id, item, &retry, correlation_id)
                .await?;

            match &outcome {
                RowOutcome::Success(_) => succeeded += 1,
                RowOutcome::Error(_) => failed += 1,
            }

            results.push(outcome);
        }

        let wall_time_ms = started.elapsed().as_millis() as u64;

        self.audit
            .append_entry(
                AuditEntryDraft::new(
                    run_id.clone(),
                    AuditEventType::BatchCompleted,
                    AuditLevel::Info,
                    "batch_worker",
                    format!(
                        "batch '{}' completed: {succeeded} succeeded, {failed} failed",
                        input.batch_id
                    ),
                )
                .with_metadata(json!({
                    "batch_id": input.batch_id,
                    "chunk_index": input.chunk_index,
                    "succeeded": succeeded,
                    "failed": failed,
                    "wall_time_ms": wall_time_ms,
                }))
                .with_correlation_id(correlation_id),
            )
            .await?;

        if let Err(error) = self.run_metadata.record_progress(run_id, succeeded, failed).await {
            warn!(
                run_id = %run_id,
                batch_id = %input.batch_id,
                error = %error,
                "failed to record batch progress; final counters are written at completion"
            );
        }

        Ok(BatchOutcome {
            batch_id: input.batch_id.clone(),
            run_id: run_id.clone(),
            chunk_index: input.chunk_index,
            processed: results.len() as u64,
            succeeded,
            failed,
            results,
            wall_time_ms,
        })
    }

    async fn process_row(
        &self,
        run_id: &RunId,
        item: &WireRow,
        retry: &RetryPolicy,
        correlation_id: &str,
    ) -> AppResult<RowOutcome> {
        let row = match StatsRow::parse(
            item.user_id.as_str(),
            &item.login_count.to_string(),
            &item.post_count.to_string(),
        ) {
            Ok(row) => row,
            Err(error) => {
                let failure = RowFailure {
                    row_index: item.row_index,
                    user_id: Some(item.user_id.clone()),
                    error: ProcessingError::new(
                        ProcessingErrorKind::Validation,
                        error.to_string(),
                    )
                    .with_correlation_id(correlation_id),
                };
                return self.finish_failure(run_id, failure).await;
            }
        };

        let users = self.users.clone();
        let user_id = row.user_id.clone();
        let loaded = retry_transient(retry, "find_user", move || {
            let users = users.clone();
            let user_id = user_id.clone();
            async move { users.find_user(&user_id).await }
        })
        .await;

        let account = match loaded {
            Ok(Some(account)) => account,
            Ok(None) => {
                let failure = RowFailure {
                    row_index: item.row_index,
                    user_id: Some(row.user_id.as_str().to_owned()),
                    error: ProcessingError::new(
                        ProcessingErrorKind::UserNotFound,
                        format!("user '{}' does not exist", row.user_id),
                    )
                    .with_metadata(json!({ "user_id": row.user_id.as_str() }))
                    .with_correlation_id(correlation_id),
                };
                return self.finish_failure(run_id, failure).await;
            }
            Err(error) => {
                let failure = RowFailure {
                    row_index: item.row_index,
                    user_id: Some(row.user_id.as_str().to_owned()),
                    error: ProcessingError::from_app_error(&error)
                        .with_correlation_id(correlation_id),
                };
                return self.finish_failure(run_id, failure).await;
            }
        };

        let planned = match account.statistics.plan_update(&row) {
            Ok(planned) => planned,
            Err(error) => {
                let failure = RowFailure {
                    row_index: item.row_index,
                    user_id: Some(row.user_id.as_str().to_owned()),
                    error: error.with_correlation_id(correlation_id),
                };
                return self.finish_failure(run_id, failure).await;
            }
        };

        if planned.is_noop() {
            let success = RowSuccess {
                row_index: item.row_index,
                user_id: planned.user_id.clone(),
                previous_login_count: planned.previous_login_count,
                previous_post_count: planned.previous_post_count,
                new_login_count: planned.new_login_count,
                new_post_count: planned.new_post_count,
                replayed: true,
            };
            return self.finish_success(run_id, success, correlation_id).await;
        }

        let users = self.users.clone();
        let apply_input = ApplyStatisticsInput {
            user_id: row.user_id.clone(),
            new_login_count: row.login_count,
            new_post_count: row.post_count,
            applied_at: Utc::now(),
        };
        let applied = retry_transient(retry, "apply_statistics", move || {
            let users = users.clone();
            let apply_input = apply_input.clone();
            async move { users.apply_statistics(apply_input).await }
        })
        .await;

        match applied {
            Ok(StatisticsApplyOutcome::Applied(update)) => {
                let success = RowSuccess {
                    row_index: item.row_index,
                    user_id: update.user_id.clone(),
                    previous_login_count: update.previous_login_count,
                    previous_post_count: update.previous_post_count,
                    new_login_count: update.new_login_count,
                    new_post_count: update.new_post_count,
                    replayed: false,
                };
                self.finish_success(run_id, success, correlation_id).await
            }
            Ok(StatisticsApplyOutcome::NoChange(update)) => {
                let success = RowSuccess {
                    row_index: item.row_index,
                    user_id: update.user_id.clone(),
                    previous_login_count: update.previous_login_count,
                    previous_post_count: update.previous_post_count,
                    new_login_count: update.new_login_count,
                    new_post_count: update.new_post_count,
                    replayed: true,
                };
                self.finish_success(run_id, success, correlation_id).await
            }
            Ok(StatisticsApplyOutcome::GuardViolation {
                current_login_count,
                current_post_count,
            }) => {
                let failure = RowFailure {
                    row_index: item.row_index,
                    user_id: Some(row.user_id.as_str().to_owned()),
                    error: ProcessingError::new(
                        ProcessingErrorKind::InvalidStatistics,
                        format!(
                            "statistics for user '{}' would decrease below ({current_login_count}, {current_post_count})",
                            row.user_id
                        ),
                    )
                    .with_metadata(json!({
                        "user_id": row.user_id.as_str(),
                        "old": {
                            "login_count": current_login_count,
                            "post_count": current_post_count,
                        },
                        "new": {
                            "login_count": row.login_count,
                            "post_count": row.post_count,
                        },
                    }))
                    .with_correlation_id(correlation_id),
                };
                self.finish_failure(run_id, failure).await
            }
            Ok(StatisticsApplyOutcome::UserMissing) => {
                let failure = RowFailure {
                    row_index: item.row_index,
                    user_id: Some(row.user_id.as_str().to_owned()),
                    error: ProcessingError::new(
                        ProcessingErrorKind::UserNotFound,
                        format!("user '{}' disappeared before the write", row.user_id),
                    )
                    .with_correlation_id(correlation_id),
                };
                self.finish_failure(run_id, failure).await
            }
            Err(error) => {
                let failure = RowFailure {
                    row_index: item.row_index,
                    user_id: Some(row.user_id.as_str().to_owned()),
                    error: ProcessingError::from_app_error(&error)
                        .with_correlation_id(correlation_id),
                };
                self.finish_failure(run_id, failure).await
            }
        }
    }

    /// Appends the success audit entry unless a replay already wrote one
    /// for `(run_id, row_index)`.
    async fn finish_success(
        &self,
        run_id: &RunId,
        success: RowSuccess,
        correlation_id: &str,
    ) -> AppResult<RowOutcome> {
        if !self.audit.has_row_entry(run_id, success.row_index).await? {
            self.audit
                .append_entry(
                    AuditEntryDraft::new(
                        run_id.clone(),
                        AuditEventType::UserUpdate,
                        AuditLevel::Info,
                        "batch_worker",
                        format!(
                            "user '{}' statistics set to ({}, {})",
                            success.user_id, success.new_login_count, success.new_post_count
                        ),
                    )
                    .with_metadata(json!({
                        "user_id": success.user_id.as_str(),
                        "old": {
                            "login_count": success.previous_login_count,
                            "post_count": success.previous_post_count,
                        },
                        "new": {
                            "login_count": success.new_login_count,
                            "post_count": success.new_post_count,
                        },
                        "row_index": success.row_index,
                    }))
                    .with_correlation_id(correlation_id)
                    .with_row_index(success.row_index),
                )
                .await?;
        }

        Ok(RowOutcome::Success(success))
    }

    async fn finish_failure(&self, run_id: &RunId, failure: RowFailure) -> AppResult<RowOutcome> {
        if !self.audit.has_row_entry(run_id, failure.row_index).await? {
            let mut draft = AuditEntryDraft::new(
                run_id.clone(),
                AuditEventType::UserUpdate,
                AuditLevel::Error,
                "batch_worker",
                failure.error.message.clone(),
            )
            .with_metadata(json!({
                "code": failure.error.code(),
                "user_id": failure.user_id,
                "row_index": failure.row_index,
            }))
            .with_row_index(failure.row_index);

            if let Some(correlation_id) = failure.error.correlation_id.as_deref() {
                draft = draft.with_correlation_id(correlation_id);
            }

            self.audit.append_entry(draft).await?;
        }

        Ok(RowOutcome::Error(failure))
    }
}
