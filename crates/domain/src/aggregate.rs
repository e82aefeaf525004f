//! Run-level aggregation of batch outcomes.
//!
//! Everything here is pure: given the same batch outcomes, the aggregated
//! result is identical except for the `generated_at` stamp. Batch order is
//! irrelevant; the aggregator never assumes inter-batch ordering.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statsink_core::RunId;

use crate::batch::BatchOutcome;
use crate::error::ProcessingErrorKind;

/// Number of error kinds reported in `top_errors`.
pub const TOP_ERROR_LIMIT: usize = 5;

/// Error-rate fraction above which the input-quality recommendation fires.
pub const ERROR_RATE_RECOMMENDATION_THRESHOLD: f64 = 0.10;

/// Average batch wall time above which the batch-size recommendation fires.
pub const SLOW_BATCH_THRESHOLD_MS: u64 = 5_000;

/// Statistics of the orchestrator's parallel-map execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapStatistics {
    /// Identifier of the parallel-map execution that produced the batches.
    pub map_run_id: String,
    /// Map start time.
    pub started_at: DateTime<Utc>,
    /// Map end time.
    pub ended_at: DateTime<Utc>,
}

/// Summed run totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedTotals {
    /// Validated data rows in the input file.
    pub total_rows: u64,
    /// Rows processed across all batches.
    pub processed: u64,
    /// Rows applied successfully.
    pub succeeded: u64,
    /// Rows that failed.
    pub failed: u64,
    /// Failed rows whose error kind is retryable.
    pub retryable_errors: u64,
    /// Failed rows whose error kind is not retryable.
    pub non_retryable_errors: u64,
}

/// Min/avg/max per-batch wall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTimings {
    /// Fastest batch in milliseconds.
    pub min_ms: u64,
    /// Mean batch time in milliseconds.
    pub avg_ms: u64,
    /// Slowest batch in milliseconds.
    pub max_ms: u64,
}

/// One error kind with its occurrence count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrequency {
    /// Stable error code.
    pub code: String,
    /// Number of rows that failed with this code.
    pub count: u64,
}

/// The run-scoped aggregation artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    /// Owning run.
    pub run_id: String,
    /// Parallel-map execution that produced the batches.
    pub map_run_id: String,
    /// Summed totals.
    pub totals: AggregatedTotals,
    /// Fraction of processed rows that succeeded (`0.0..=1.0`).
    pub success_rate: f64,
    /// Fraction of processed rows that failed (`0.0..=1.0`).
    pub error_rate: f64,
    /// Processed rows per second over the map duration.
    pub throughput_per_second: f64,
    /// Map duration in seconds.
    pub duration_seconds: f64,
    /// Per-batch wall-time distribution.
    pub batch_timings: BatchTimings,
    /// Error counts keyed by stable error code, deterministically ordered.
    pub error_breakdown_by_type: BTreeMap<String, u64>,
    /// Most frequent error kinds, count-descending then code-ascending.
    pub top_errors: Vec<ErrorFrequency>,
    /// Deterministic operator recommendations.
    pub recommendations: Vec<String>,
    /// Aggregation time.
    pub generated_at: DateTime<Utc>,
}

/// Builds the aggregated result from per-batch outcomes.
pub fn build_aggregated_result(
    run_id: &RunId,
    total_rows: u64,
    outcomes: &[BatchOutcome],
    map: &MapStatistics,
) -> AggregatedResult {
    let mut totals = AggregatedTotals {
        total_rows,
        processed: 0,
        succeeded: 0,
        failed: 0,
        retryable_errors: 0,
        non_retryable_errors: 0,
    };
    let mut breakdown: BTreeMap<String, u64> = BTreeMap::new();
    let mut unknown_users: u64 = 0;

    for outcome in outcomes {
        totals.processed = totals.processed.saturating_add(outcome.processed);
        totals.succeeded = totals.succeeded.saturating_add(outcome.succeeded);
        totals.failed = totals.failed.saturating_add(outcome.failed);

        for failure in outcome.failures() {
            let kind = failure.error.kind;
            *breakdown.entry(kind.code().to_owned()).or_insert(0) += 1;

            if kind.is_retryable() {
                totals.retryable_errors = totals.retryable_errors.saturating_add(1);
            } else {
                totals.non_retryable_errors = totals.non_retryable_errors.saturating_add(1);
            }

            if kind == ProcessingErrorKind::UserNotFound {
                unknown_users = unknown_users.saturating_add(1);
            }
        }
    }

    let (success_rate, error_rate) = if totals.processed > 0 {
        (
            totals.succeeded as f64 / totals.processed as f64,
            totals.failed as f64 / totals.processed as f64,
        )
    } else {
        (0.0, 0.0)
    };

    let duration_seconds =
        (map.ended_at - map.started_at).num_milliseconds().max(0) as f64 / 1_000.0;
    let throughput_per_second = if duration_seconds > 0.0 {
        totals.processed as f64 / duration_seconds
    } else {
        0.0
    };

    let batch_timings = batch_timings(outcomes);
    let top_errors = top_errors(&breakdown);
    let recommendations = recommendations(
        &totals,
        error_rate,
        unknown_users,
        batch_timings.avg_ms,
    );

    AggregatedResult {
        run_id: run_id.as_str().to_owned(),
        map_run_id: map.map_run_id.clone(),
        totals,
        success_rate,
        error_rate,
        throughput_per_second,
        duration_seconds,
        batch_timings,
        error_breakdown_by_type: breakdown,
        top_errors,
        recommendations,
        generated_at: Utc::now(),
    }
}

fn batch_timings(outcomes: &[BatchOutcome]) -> BatchTimings {
    if outcomes.is_empty() {
        return BatchTimings {
            min_ms: 0,
            avg_ms: 0,
            max_ms: 0,
        };
    }

    let mut min_ms = u64::MAX;
    let mut max_ms = 0_u64;
    let mut sum_ms = 0_u64;

    for outcome in outcomes {
        min_ms = min_ms.min(outcome.wall_time_ms);
        max_ms = max_ms.max(outcome.wall_time_ms);
        sum_ms = sum_ms.saturating_add(outcome.wall_time_ms);
    }

    BatchTimings {
        min_ms,
        avg_ms: sum_ms / outcomes.len() as u64,
        max_ms,
    }
}

fn top_errors(breakdown: &BTreeMap<String, u64>) -> Vec<ErrorFrequency> {
    let mut frequencies: Vec<ErrorFrequency> = breakdown
        .iter()
        .map(|(code, count)| ErrorFrequency {
            code: code.clone(),
            count: *count,
        })
        .collect();

    frequencies.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.code.cmp(&b.code)));
    frequencies.truncate(TOP_ERROR_LIMIT);
    frequencies
}

fn recommendations(
    totals: &AggregatedTotals,
    error_rate: f64,
    unknown_users: u64,
    avg_batch_ms: u64,
) -> Vec<String> {
    let mut recommendations = Vec::new();

    if totals.processed == 0 {
        recommendations.push("Input file contained no data rows; nothing was processed.".to_owned());
        return recommendations;
    }

    if error_rate > ERROR_RATE_RECOMMENDATION_THRESHOLD {
        recommendations.push(format!(
            "Error rate {:.1}% exceeds 10%; investigate input data quality before the next run.",
            error_rate * 100.0
        ));
    }

    if unknown_users > 0 {
        recommendations.push(format!(
            "{unknown_users} rows referenced unknown user ids; reconcile the user master data."
        ));
    }

    if totals.retryable_errors > 0 {
        recommendations.push(format!(
            "{} rows failed on transient store errors after retries; review store capacity and retry settings.",
            totals.retryable_errors
        ));
    }

    if avg_batch_ms > SLOW_BATCH_THRESHOLD_MS {
        recommendations.push(format!(
            "Average batch time {avg_batch_ms}ms exceeds 5s; consider a smaller batch size."
        ));
    }

    if recommendations.is_empty() {
        recommendations.push("All rows processed within tolerance; no action required.".to_owned());
    }

    recommendations
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use statsink_core::{AppResult, RunId};

    use crate::batch::{BatchOutcome, RowFailure, RowOutcome, RowSuccess};
    use crate::error::{ProcessingError, ProcessingErrorKind};
    use crate::row::StatsUserId;

    use super::{MapStatistics, build_aggregated_result};

    fn map_statistics(duration_ms: i64) -> MapStatistics {
        let started_at = Utc::now();
        MapStatistics {
            map_run_id: "map-0001".to_owned(),
            started_at,
            ended_at: started_at + Duration::milliseconds(duration_ms),
        }
    }

    fn success(row_index: u64) -> AppResult<RowOutcome> {
        Ok(RowOutcome::Success(RowSuccess {
            row_index,
            user_id: StatsUserId::new(format!("U{row_index:05}"))?,
            previous_login_count: 0,
            previous_post_count: 0,
            new_login_count: 1,
            new_post_count: 1,
            replayed: false,
        }))
    }

    fn failure(row_index: u64, kind: ProcessingErrorKind) -> RowOutcome {
        RowOutcome::Error(RowFailure {
            row_index,
            user_id: None,
            error: ProcessingError::new(kind, "failed"),
        })
    }

    fn outcome(run_id: &RunId, chunk_index: u32, results: Vec<RowOutcome>) -> BatchOutcome {
        let processed = results.len() as u64;
        let failed = results
            .iter()
            .filter(|result| matches!(result, RowOutcome::Error(_)))
            .count() as u64;

        BatchOutcome {
            batch_id: format!("{run_id}:{chunk_index}"),
            run_id: run_id.clone(),
            chunk_index,
            processed,
            succeeded: processed - failed,
            failed,
            results,
            wall_time_ms: 100,
        }
    }

    #[test]
    fn sums_counts_and_rates() -> AppResult<()> {
        let run_id = RunId::new("stats-120000")?;
        let outcomes = vec![
            outcome(&run_id, 0, vec![success(0)?, success(1)?]),
            outcome(
                &run_id,
                1,
                vec![
                    success(2)?,
                    failure(3, ProcessingErrorKind::UserNotFound),
                ],
            ),
        ];

        let result =
            build_aggregated_result(&run_id, 4, &outcomes, &map_statistics(2_000));

        assert_eq!(result.totals.processed, 4);
        assert_eq!(result.totals.succeeded, 3);
        assert_eq!(result.totals.failed, 1);
        assert_eq!(result.totals.non_retryable_errors, 1);
        assert!((result.success_rate - 0.75).abs() < f64::EPSILON);
        assert!((result.error_rate - 0.25).abs() < f64::EPSILON);
        assert!((result.throughput_per_second - 2.0).abs() < f64::EPSILON);
        assert_eq!(result.error_breakdown_by_type.get("USER_NOT_FOUND"), Some(&1));
        Ok(())
    }

    #[test]
    fn aggregation_is_order_independent() -> AppResult<()> {
        let run_id = RunId::new("stats-120000")?;
        let forward = vec![
            outcome(&run_id, 0, vec![success(0)?]),
            outcome(&run_id, 1, vec![failure(1, ProcessingErrorKind::InvalidStatistics)]),
        ];
        let reversed: Vec<_> = forward.iter().rev().cloned().collect();

        let map = map_statistics(1_000);
        let a = build_aggregated_result(&run_id, 2, &forward, &map);
        let b = build_aggregated_result(&run_id, 2, &reversed, &map);

        assert_eq!(a.totals, b.totals);
        assert_eq!(a.error_breakdown_by_type, b.error_breakdown_by_type);
        assert_eq!(a.top_errors, b.top_errors);
        assert_eq!(a.recommendations, b.recommendations);
        Ok(())
    }

    #[test]
    fn empty_run_aggregates_to_zeroes() -> AppResult<()> {
        let run_id = RunId::new("stats-120000")?;
        let result = build_aggregated_result(&run_id, 0, &[], &map_statistics(500));

        assert_eq!(result.totals.processed, 0);
        assert!(result.error_rate.abs() < f64::EPSILON);
        assert_eq!(result.batch_timings.min_ms, 0);
        assert_eq!(
            result.recommendations,
            vec!["Input file contained no data rows; nothing was processed.".to_owned()]
        );
        Ok(())
    }

    #[test]
    fn high_error_rate_recommends_input_review() -> AppResult<()> {
        let run_id = RunId::new("stats-120000")?;
        let outcomes = vec![outcome(
            &run_id,
            0,
            vec![
                success(0)?,
                failure(1, ProcessingErrorKind::UserNotFound),
                failure(2, ProcessingErrorKind::DatabaseConnection),
            ],
        )];

        let result = build_aggregated_result(&run_id, 3, &outcomes, &map_statistics(1_000));

        assert!(result.recommendations.iter().any(|r| r.contains("input data quality")));
        assert!(result.recommendations.iter().any(|r| r.contains("unknown user ids")));
        assert!(result.recommendations.iter().any(|r| r.contains("transient store errors")));
        assert_eq!(result.totals.retryable_errors, 1);
        Ok(())
    }

    #[test]
    fn top_errors_are_sorted_by_count_then_code() -> AppResult<()> {
        let run_id = RunId::new("stats-120000")?;
        let outcomes = vec![outcome(
            &run_id,
            0,
            vec![
                failure(0, ProcessingErrorKind::UserNotFound),
                failure(1, ProcessingErrorKind::UserNotFound),
                failure(2, ProcessingErrorKind::InvalidStatistics),
                failure(3, ProcessingErrorKind::CsvFormat),
            ],
        )];

        let result = build_aggregated_result(&run_id, 4, &outcomes, &map_statistics(1_000));

        assert_eq!(result.top_errors[0].code, "USER_NOT_FOUND");
        assert_eq!(result.top_errors[0].count, 2);
        assert_eq!(result.top_errors[1].code, "CSV_FORMAT_ERROR");
        assert_eq!(result.top_errors[2].code, "INVALID_STATISTICS");
        Ok(())
    }
}
