//! The run state machine: dispatch, validate, partition, parallel
//! workers, aggregate.

use std::sync::Arc;

use chrono::Utc;
use statsink_core::{AppError, AppResult, RunId};
use statsink_domain::{
    BatchOutcome, MapStatistics, ProcessingError, ProcessingErrorKind, RowBatch, RowFailure,
    RowOutcome, Run, RunStatus, partition_rows,
};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregation_service::{AggregationReport, Aggregator};
use crate::config::PipelineConfig;
use crate::contracts::{ExecutionContext, ProcessingConfig, WorkerBatchInput};
use crate::dispatch_service::{DispatchOutcome, RunDispatcher};
use crate::event::ParsedEvent;
use crate::ingest_ports::RunMetadataRepository;
use crate::validation_service::CsvValidator;
use crate::worker_service::BatchWorker;

/// Terminal outcome of one pipeline execution.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// The run went through all phases and was aggregated.
    Completed(Box<AggregationReport>),
    /// Another run with the same id already exists; nothing was started.
    Duplicate(Run),
    /// Validation short-circuited the run to `failed`.
    ValidationFailed(Run),
    /// The run was cancelled while batches were in flight.
    Aborted(Run),
    /// The run-level deadline elapsed.
    TimedOut(Run),
}

/// The fan-out/fan-in ingestion state machine.
///
/// Control flow: dispatch, then validate, then partition, then parallel
/// workers bounded to the concurrency cap, then aggregation. Workers
/// coordinate only through the stores; batch outcomes flow back through
/// the join below.
pub struct IngestionPipeline {
    dispatcher: RunDispatcher,
    validator: CsvValidator,
    worker: Arc<BatchWorker>,
    aggregator: Arc<Aggregator>,
    run_metadata: Arc<dyn RunMetadataRepository>,
    config: PipelineConfig,
}

impl IngestionPipeline {
    /// Creates the pipeline from its composed services.
    pub fn new(
        dispatcher: RunDispatcher,
        validator: CsvValidator,
        worker: Arc<BatchWorker>,
        aggregator: Arc<Aggregator>,
        run_metadata: Arc<dyn RunMetadataRepository>,
        config: PipelineConfig,
    ) -> AppResult<Self> {
        config.validate()?;

        Ok(Self {
            dispatcher,
            validator,
            worker,
            aggregator,
            run_metadata,
            config,
        })
    }

    /// Executes one run for one trigger event.
    pub async fn execute(&self, event: &ParsedEvent) -> AppResult<PipelineOutcome> {
        self.execute_with_cancel(event, None).await
    }

    /// Executes one run, observing an external cancellation signal.
    ///
    /// Cancellation stops dispatching new batches; in-flight workers may
    /// still complete and write audit entries, which is safe because the
    /// relational updates are monotonic.
    pub async fn execute_with_cancel(
        &self,
        event: &ParsedEvent,
        cancel: Option<watch::Receiver<bool>>,
    ) -> AppResult<PipelineOutcome> {
        let run = match self.dispatcher.start(event).await? {
            DispatchOutcome::Accepted(run) => run,
            DispatchOutcome::Duplicate(run) => {
                info!(run_id = %run.run_id, "duplicate start rejected; existing run wins");
                return Ok(PipelineOutcome::Duplicate(run));
            }
        };

        let run_id = run.run_id.clone();
        let phases = self.run_phases(&run_id, event, cancel);

        match tokio::time::timeout(self.config.run_timeout, phases).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => {
                warn!(run_id = %run_id, "run deadline elapsed; terminating");
                let run = self
                    .aggregator
                    .complete_exceptional(&run_id, RunStatus::TimedOut, "run deadline elapsed")
                    .await?;
                Ok(PipelineOutcome::TimedOut(run))
            }
        }
    }

    async fn run_phases(
        &self,
        run_id: &RunId,
        event: &ParsedEvent,
        cancel: Option<watch::Receiver<bool>>,
    ) -> AppResult<PipelineOutcome> {
        let object = event.storage_object().ok_or_else(|| {
            AppError::Configuration("trigger event carries no storage object".to_owned())
        })?;

        let map_run_id = Uuid::new_v4().to_string();
        let map_started_at = Utc::now();

        let validation = self
            .validator
            .validate(object.bucket.as_str(), object.key.as_str(), run_id)
            .await?;

        if !validation.valid {
            let error = validation.errors.first().cloned().unwrap_or_else(|| {
                ProcessingError::new(ProcessingErrorKind::Validation, "validation failed")
            });
            let run = self
                .aggregator
                .complete_with_validation_failure(run_id, &error)
                .await?;
            return Ok(PipelineOutcome::ValidationFailed(run));
        }

        let total_rows = validation.statistics.row_count;
        self.run_metadata.set_total_rows(run_id, total_rows).await?;

        let batches = partition_rows(run_id, validation.rows, self.config.batch_max)?;
        info!(
            run_id = %run_id,
            total_rows,
            batches = batches.len(),
            rejected_rows = validation.row_failures.len(),
            "dispatching batches"
        );

        let (mut outcomes, cancelled) = self
            .process_batches(run_id, &map_run_id, batches, cancel)
            .await;

        if !validation.row_failures.is_empty() {
            outcomes.push(rejected_rows_outcome(run_id, validation.row_failures));
        }

        if cancelled {
            let run = self
                .aggregator
                .complete_exceptional(run_id, RunStatus::Aborted, "parent run cancelled")
                .await?;
            return Ok(PipelineOutcome::Aborted(run));
        }

        let map = MapStatistics {
            map_run_id,
            started_at: map_started_at,
            ended_at: Utc::now(),
        };

        let report = self
            .aggregator
            .aggregate(run_id, total_rows, &outcomes, &map)
            .await?;

        info!(
            run_id = %run_id,
            status = report.run.status.as_str(),
            succeeded = report.result.totals.succeeded,
            failed = report.result.totals.failed,
            "run finished"
        );

        Ok(PipelineOutcome::Completed(Box::new(report)))
    }

    /// Runs batches through workers with bounded parallelism.
    ///
    /// Returns the collected outcomes and whether cancellation stopped
    /// dispatch before every batch ran.
    async fn process_batches(
        &self,
        run_id: &RunId,
        map_run_id: &str,
        batches: Vec<RowBatch>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> (Vec<BatchOutcome>, bool) {
        let mut outcomes = Vec::with_capacity(batches.len());
        let mut in_flight: JoinSet<BatchOutcome> = JoinSet::new();
        let mut remaining = batches.into_iter();
        let mut cancelled = false;

        loop {
            while !cancelled && in_flight.len() < self.config.max_concurrency.max(1) {
                if cancellation_requested(cancel.as_ref()) {
                    cancelled = true;
                    break;
                }

                let Some(batch) = remaining.next() else {
                    break;
                };

                let worker = self.worker.clone();
                let run_id = run_id.clone();
                let input = WorkerBatchInput::from_batch(
                    &batch,
                    ExecutionContext {
                        execution_id: map_run_id.to_owned(),
                        timestamp: Utc::now(),
                    },
                    ProcessingConfig {
                        retry_on_conflict: true,
                        batch_timeout: self.config.batch_timeout.as_secs(),
                        max_retries: self.config.worker_retry.max_attempts,
                    },
                );
                let batch_timeout = self.config.batch_timeout;
                let max_attempts = self.config.max_map_retries.saturating_add(1);

                in_flight.spawn(async move {
                    run_batch_with_retries(worker, run_id, batch, input, batch_timeout, max_attempts)
                        .await
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                if cancelled || remaining.len() == 0 {
                    break;
                }
                continue;
            };

            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => {
                    // A panicked worker task loses its batch outcome; the
                    // run still terminates and the counters stay consistent
                    // with what was actually processed.
                    warn!(run_id = %run_id, error = %error, "worker task join failed");
                }
            }
        }

        (outcomes, cancelled)
    }
}

fn cancellation_requested(cancel: Option<&watch::Receiver<bool>>) -> bool {
    cancel.is_some_and(|receiver| *receiver.borrow())
}

async fn run_batch_with_retries(
    worker: Arc<BatchWorker>,
    run_id: RunId,
    batch: RowBatch,
    input: WorkerBatchInput,
    batch_timeout: std::time::Duration,
    max_attempts: u32,
) -> BatchOutcome {
    let mut attempt = 0_u32;

    loop {
        attempt += 1;

        match tokio::time::timeout(batch_timeout, worker.process_batch(&run_id, &input)).await {
            Ok(Ok(outcome)) => return outcome,
            Ok(Err(error)) if error.is_retryable() && attempt < max_attempts => {
                warn!(
                    run_id = %run_id,
                    batch_id = %input.batch_id,
                    attempt,
                    error = %error,
                    "batch failed on a retryable error; retrying at the map level"
                );
            }
            Ok(Err(error)) => {
                warn!(
                    run_id = %run_id,
                    batch_id = %input.batch_id,
                    error = %error,
                    "batch failed; folding the error into the outcome"
                );
                return failed_batch_outcome(
                    &run_id,
                    &batch,
                    ProcessingError::from_app_error(&error),
                );
            }
            Err(_elapsed) if attempt < max_attempts => {
                warn!(
                    run_id = %run_id,
                    batch_id = %input.batch_id,
                    attempt,
                    "batch deadline elapsed; retrying at the map level"
                );
            }
            Err(_elapsed) => {
                warn!(
                    run_id = %run_id,
                    batch_id = %input.batch_id,
                    "batch deadline elapsed; classifying rows as timed out"
                );
                return failed_batch_outcome(
                    &run_id,
                    &batch,
                    ProcessingError::new(
                        ProcessingErrorKind::ProcessingTimeout,
                        format!(
                            "batch '{}' exceeded its {}s deadline",
                            batch.batch_id,
                            batch_timeout.as_secs()
                        ),
                    ),
                );
            }
        }
    }
}

/// Builds the all-failed outcome for a batch that never produced one.
fn failed_batch_outcome(run_id: &RunId, batch: &RowBatch, error: ProcessingError) -> BatchOutcome {
    let results: Vec<RowOutcome> = batch
        .rows
        .iter()
        .map(|validated| {
            RowOutcome::Error(RowFailure {
                row_index: validated.index,
                user_id: Some(validated.row.user_id.as_str().to_owned()),
                error: error.clone(),
            })
        })
        .collect();

    BatchOutcome {
        batch_id: batch.batch_id.clone(),
        run_id: run_id.clone(),
        chunk_index: batch.chunk_index,
        processed: results.len() as u64,
        succeeded: 0,
        failed: results.len() as u64,
        results,
        wall_time_ms: 0,
    }
}

/// Folds rows rejected during validation into one synthetic outcome so
/// the aggregated counters cover every data row in the file.
fn rejected_rows_outcome(run_id: &RunId, failures: Vec<RowFailure>) -> BatchOutcome {
    let failed = failures.len() as u64;

    BatchOutcome {
        batch_id: format!("{run_id}:rejected"),
        run_id: run_id.clone(),
        chunk_index: u32::MAX,
        processed: failed,
        succeeded: 0,
        failed,
        results: failures.into_iter().map(RowOutcome::Error).collect(),
        wall_time_ms: 0,
    }
}
