//! Run lifecycle and run-id derivation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statsink_core::{AppError, AppResult, RunId};

/// Maximum length of the sanitized object-key stem before the time suffix.
const RUN_ID_STEM_MAX_LENGTH: usize = 70;

/// Lifecycle status of one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is in flight.
    Running,
    /// Run finished within the tolerated failure percentage.
    Succeeded,
    /// Run finished above the tolerated failure percentage, or validation
    /// short-circuited it.
    Failed,
    /// Run was cancelled by the orchestrator.
    Aborted,
    /// Run exceeded its run-level deadline.
    TimedOut,
}

impl RunStatus {
    /// Returns the stable status string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
            Self::TimedOut => "timed_out",
        }
    }

    /// Parses a stable status string.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "aborted" => Ok(Self::Aborted),
            "timed_out" => Ok(Self::TimedOut),
            other => Err(AppError::Validation(format!(
                "unknown run status '{other}'"
            ))),
        }
    }

    /// Returns whether the status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Returns whether a transition to `next` is allowed.
    ///
    /// Transitions only move forward: `running` may become any terminal
    /// status; a terminal status never changes again.
    #[must_use]
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(self, Self::Running) && next.is_terminal()
    }

    /// Picks the terminal status from the run's final error rate.
    ///
    /// `error_rate` is a fraction in `0.0..=1.0`; `tolerated_percentage`
    /// is a percentage in `0..=100`.
    #[must_use]
    pub fn from_error_rate(error_rate: f64, tolerated_percentage: f64) -> Self {
        if error_rate * 100.0 <= tolerated_percentage {
            Self::Succeeded
        } else {
            Self::Failed
        }
    }
}

/// One ingestion run as tracked by the run-metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Stable run identifier derived from the source object key.
    pub run_id: RunId,
    /// Source object reference (`bucket/key`).
    pub source_ref: String,
    /// Current lifecycle status.
    pub status: RunStatus,
    /// Number of validated data rows in the input file.
    pub total_rows: u64,
    /// Rows processed successfully so far.
    pub success_count: u64,
    /// Rows that failed so far.
    pub error_count: u64,
    /// Run start time.
    pub started_at: DateTime<Utc>,
    /// Run end time, set with the terminal status.
    pub ended_at: Option<DateTime<Utc>>,
    /// Reference to the aggregated artifact, set on completion.
    pub output_ref: Option<String>,
}

impl Run {
    /// Checks the counter invariant `success + error <= total`.
    #[must_use]
    pub fn counters_consistent(&self) -> bool {
        self.success_count.saturating_add(self.error_count) <= self.total_rows
    }
}

/// Derives the stable run identifier from a source object key.
///
/// The key's path prefix and extension are stripped; characters outside
/// `[A-Za-z0-9_-]` become `-`; consecutive hyphens collapse; leading and
/// trailing hyphens are trimmed; the stem is truncated to 70 characters
/// and suffixed with `-HHMMSS` from the run start time. The result always
/// satisfies `RunId`'s charset and the 80-character cap, so identical
/// uploads within one second map to the same run id.
pub fn run_id_from_object_key(key: &str, started_at: DateTime<Utc>) -> AppResult<RunId> {
    let basename = key.rsplit('/').next().unwrap_or(key);
    let stem = match basename.rsplit_once('.') {
        Some((stem, _extension)) if !stem.is_empty() => stem,
        _ => basename,
    };

    let mut sanitized = String::with_capacity(stem.len());
    let mut previous_was_hyphen = false;
    for ch in stem.chars() {
        let mapped = if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            ch
        } else {
            '-'
        };

        if mapped == '-' {
            if previous_was_hyphen {
                continue;
            }
            previous_was_hyphen = true;
        } else {
            previous_was_hyphen = false;
        }

        sanitized.push(mapped);
    }

    let mut trimmed: String = sanitized.trim_matches('-').to_owned();
    trimmed.truncate(RUN_ID_STEM_MAX_LENGTH);
    let trimmed = trimmed.trim_end_matches('-');

    if trimmed.is_empty() {
        return Err(AppError::Configuration(format!(
            "object key '{key}' yields an empty run id stem"
        )));
    }

    let mut candidate = format!("{trimmed}-{}", started_at.format("%H%M%S"));
    candidate.truncate(statsink_core::RUN_ID_MAX_LENGTH);

    RunId::new(candidate)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use statsink_core::{AppResult, RunId};

    use super::{Run, RunStatus, run_id_from_object_key};

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 34, 56)
            .single()
            .unwrap_or_default()
    }

    #[test]
    fn derives_run_id_from_nested_key() -> AppResult<()> {
        let run_id = run_id_from_object_key("incoming/2024/user stats (v2).csv", noon())?;
        assert_eq!(run_id.as_str(), "user-stats-v2-123456");
        Ok(())
    }

    #[test]
    fn strips_only_the_final_extension() -> AppResult<()> {
        let run_id = run_id_from_object_key("uploads/daily.stats.csv", noon())?;
        assert_eq!(run_id.as_str(), "daily-stats-123456");
        Ok(())
    }

    #[test]
    fn collapses_and_trims_hyphens() -> AppResult<()> {
        let run_id = run_id_from_object_key("--weird###name--.csv", noon())?;
        assert_eq!(run_id.as_str(), "weird-name-123456");
        Ok(())
    }

    #[test]
    fn truncates_long_stems_to_the_cap() -> AppResult<()> {
        let key = format!("{}.csv", "x".repeat(200));
        let run_id = run_id_from_object_key(&key, noon())?;
        assert!(run_id.as_str().len() <= 80);
        assert!(run_id.as_str().ends_with("-123456"));
        Ok(())
    }

    #[test]
    fn rejects_keys_with_no_usable_stem() {
        assert!(run_id_from_object_key("###.csv", noon()).is_err());
        assert!(run_id_from_object_key("", noon()).is_err());
    }

    #[test]
    fn terminal_statuses_never_transition() {
        assert!(RunStatus::Running.can_transition_to(RunStatus::Succeeded));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Aborted));
        assert!(!RunStatus::Succeeded.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Running.can_transition_to(RunStatus::Running));
    }

    #[test]
    fn error_rate_gate_picks_terminal_status() {
        assert_eq!(
            RunStatus::from_error_rate(0.0, 5.0),
            RunStatus::Succeeded
        );
        assert_eq!(
            RunStatus::from_error_rate(0.05, 5.0),
            RunStatus::Succeeded
        );
        assert_eq!(RunStatus::from_error_rate(0.33, 5.0), RunStatus::Failed);
    }

    #[test]
    fn counter_invariant_holds() -> AppResult<()> {
        let run = Run {
            run_id: RunId::new("r-123456")?,
            source_ref: "input/users.csv".to_owned(),
            status: RunStatus::Running,
            total_rows: 10,
            success_count: 6,
            error_count: 4,
            started_at: noon(),
            ended_at: None,
            output_ref: None,
        };
        assert!(run.counters_consistent());
        Ok(())
    }

    mod derivation_laws {
        use proptest::prelude::*;

        use super::{noon, run_id_from_object_key};

        proptest! {
            #[test]
            fn derived_ids_always_match_the_run_id_charset(key in "[a-zA-Z0-9_/ .#-]{1,120}") {
                if let Ok(run_id) = run_id_from_object_key(&key, noon()) {
                    prop_assert!(run_id.as_str().len() <= 80);
                    prop_assert!(!run_id.as_str().is_empty());
                    prop_assert!(
                        run_id
                            .as_str()
                            .chars()
                            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
                    );
                }
            }

            #[test]
            fn derivation_is_deterministic(key in "[a-zA-Z0-9_/ .#-]{1,120}") {
                let first = run_id_from_object_key(&key, noon());
                let second = run_id_from_object_key(&key, noon());
                match (first, second) {
                    (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
                    (Err(_), Err(_)) => {}
                    _ => prop_assert!(false, "derivation was not deterministic"),
                }
            }
        }
    }
}
