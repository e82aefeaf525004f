//! Run aggregation: fan-in of batch outcomes, artifact write, terminal
//! state.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use chrono::Utc;
use flate2::Compression;
use flate2::write::GzEncoder;
use md5::{Digest, Md5};
use serde_json::json;
use statsink_core::{AppError, AppResult, RunId};
use statsink_domain::{
    AggregatedResult, AuditEntryDraft, AuditEventType, AuditLevel, BatchOutcome, MapStatistics,
    ProcessingError, Run, RunStatus, build_aggregated_result,
};

use crate::ingest_ports::{
    AuditRepository, CompleteRunInput, ObjectStore, PutObjectInput, RunMetadataRepository,
};

/// Completed aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationReport {
    /// The aggregated result as persisted.
    pub result: AggregatedResult,
    /// Key of the compressed artifact in the output bucket.
    pub artifact_key: String,
    /// Run row after the terminal write.
    pub run: Run,
}

/// Aggregator: consumes per-batch outcomes and finishes the run.
pub struct Aggregator {
    object_store: Arc<dyn ObjectStore>,
    run_metadata: Arc<dyn RunMetadataRepository>,
    audit: Arc<dyn AuditRepository>,
    output_bucket: String,
    tolerated_failure_percentage: f64,
}

impl Aggregator {
    /// Creates the aggregator.
    #[must_use]
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        run_metadata: Arc<dyn RunMetadataRepository>,
        audit: Arc<dyn AuditRepository>,
        output_bucket: impl Into<String>,
        tolerated_failure_percentage: f64,
    ) -> Self {
        Self {
            object_store,
            run_metadata,
            audit,
            output_bucket: output_bucket.into(),
            tolerated_failure_percentage,
        }
    }

    /// Aggregates batch outcomes, writes the compressed artifact, and
    /// completes the run.
    ///
    /// Re-running with the same inputs rewrites a byte-identical artifact
    /// (except timestamps), leaves the already-terminal run row untouched,
    /// and appends no second terminal audit marker.
    pub async fn aggregate(
        &self,
        run_id: &RunId,
        total_rows: u64,
        outcomes: &[BatchOutcome],
        map: &MapStatistics,
    ) -> AppResult<AggregationReport> {
        let result = build_aggregated_result(run_id, total_rows, outcomes, map);

        let artifact_key = format!(
            "results/{}/{}/{}/aggregated-result.json.gz",
            map.ended_at.format("%Y-%m-%d"),
            run_id,
            map.map_run_id
        );
        let compressed = compress_json(&result)?;
        let md5_hex = hex_digest(&compressed);

        let mut metadata = BTreeMap::new();
        metadata.insert("execution-id".to_owned(), map.map_run_id.clone());
        metadata.insert(
            "total-processed".to_owned(),
            result.totals.processed.to_string(),
        );
        metadata.insert("md5-hash".to_owned(), md5_hex.clone());

        self.object_store
            .put_object(PutObjectInput {
                bucket: self.output_bucket.clone(),
                key: artifact_key.clone(),
                bytes: compressed,
                content_type: "application/json".to_owned(),
                content_encoding: Some("gzip".to_owned()),
                content_md5: Some(md5_hex),
                server_side_encryption: Some("AES256".to_owned()),
                metadata,
            })
            .await?;

        let status =
            RunStatus::from_error_rate(result.error_rate, self.tolerated_failure_percentage);
        let already_terminal = self.is_terminal(run_id).await?;

        let run = self
            .run_metadata
            .complete_run(CompleteRunInput {
                run_id: run_id.clone(),
                status,
                total_rows,
                success_count: result.totals.succeeded,
                error_count: result.totals.failed,
                ended_at: Utc::now(),
                output_ref: Some(format!("{}/{artifact_key}", self.output_bucket)),
            })
            .await?;

        if !already_terminal {
            self.append_terminal_marker(
                run_id,
                status,
                json!({
                    "total_rows": total_rows,
                    "succeeded": result.totals.succeeded,
                    "failed": result.totals.failed,
                    "error_rate": result.error_rate,
                    "output_ref": run.output_ref,
                }),
            )
            .await?;
        }

        Ok(AggregationReport {
            result,
            artifact_key,
            run,
        })
    }

    /// Finishes a run on the terminal-error branch (validation failure).
    ///
    /// No batches ran and no artifact is written; the run fails with one
    /// terminal audit entry.
    pub async fn complete_with_validation_failure(
        &self,
        run_id: &RunId,
        error: &ProcessingError,
    ) -> AppResult<Run> {
        let already_terminal = self.is_terminal(run_id).await?;

        let run = self
            .run_metadata
            .complete_run(CompleteRunInput {
                run_id: run_id.clone(),
                status: RunStatus::Failed,
                total_rows: 0,
                success_count: 0,
                error_count: 0,
                ended_at: Utc::now(),
                output_ref: None,
            })
            .await?;

        if !already_terminal {
            self.append_terminal_marker(
                run_id,
                RunStatus::Failed,
                json!({ "code": error.code(), "message": error.message }),
            )
            .await?;
        }

        Ok(run)
    }

    /// Finishes a run cancelled or timed out by the orchestrator.
    ///
    /// The progress counters recorded by workers so far become the run's
    /// final counters.
    pub async fn complete_exceptional(
        &self,
        run_id: &RunId,
        status: RunStatus,
        reason: &str,
    ) -> AppResult<Run> {
        if !status.is_terminal() || matches!(status, RunStatus::Succeeded) {
            return Err(AppError::Validation(format!(
                "exceptional completion requires a failure status, got '{}'",
                status.as_str()
            )));
        }

        let current = self
            .run_metadata
            .find_run(run_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("run '{run_id}'")))?;

        if current.status.is_terminal() {
            return Ok(current);
        }

        let run = self
            .run_metadata
            .complete_run(CompleteRunInput {
                run_id: run_id.clone(),
                status,
                total_rows: current.total_rows,
                success_count: current.success_count,
                error_count: current.error_count,
                ended_at: Utc::now(),
                output_ref: None,
            })
            .await?;

        self.append_terminal_marker(run_id, status, json!({ "reason": reason }))
            .await?;

        Ok(run)
    }

    async fn is_terminal(&self, run_id: &RunId) -> AppResult<bool> {
        Ok(self
            .run_metadata
            .find_run(run_id)
            .await?
            .is_some_and(|run| run.status.is_terminal()))
    }

    async fn append_terminal_marker(
        &self,
        run_id: &RunId,
        status: RunStatus,
        metadata: serde_json::Value,
    ) -> AppResult<()> {
        let (event_type, level) = if matches!(status, RunStatus::Succeeded) {
            (AuditEventType::RunCompleted, AuditLevel::Info)
        } else {
            (AuditEventType::RunFailed, AuditLevel::Error)
        };

        self.audit
            .append_entry(
                AuditEntryDraft::new(
                    run_id.clone(),
                    event_type,
                    level,
                    "aggregator",
                    format!("run finished with status '{}'", status.as_str()),
                )
                .with_metadata(metadata),
            )
            .await
    }
}

fn compress_json(result: &AggregatedResult) -> AppResult<Vec<u8>> {
    let json = serde_json::to_vec(result)
        .map_err(|error| AppError::Internal(format!("failed to serialize result: {error}")))?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|error| AppError::Internal(format!("failed to gzip result: {error}")))?;
    encoder
        .finish()
        .map_err(|error| AppError::Internal(format!("failed to gzip result: {error}")))
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Md5::digest(bytes);
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}
