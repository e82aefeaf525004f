//! User accounts and the monotonic statistics invariant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{ProcessingError, ProcessingErrorKind};
use crate::row::{StatsRow, StatsUserId};

/// Embedded per-user counters.
///
/// `login_count` and `post_count` only ever move upward across successful
/// updates; the relational adapter enforces the same rule in its `UPDATE`
/// guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStatistics {
    /// Lifetime login total.
    pub login_count: u64,
    /// Lifetime post total.
    pub post_count: u64,
    /// Time of the last login-count increase.
    pub last_login_at: Option<DateTime<Utc>>,
    /// Time of the last post-count increase.
    pub last_post_at: Option<DateTime<Utc>>,
    /// Time of the last statistics write.
    pub last_updated_at: DateTime<Utc>,
}

impl UserStatistics {
    /// Plans the monotonic update from the current counters to the row's
    /// authoritative totals.
    ///
    /// CSV values are new totals, never increments. A target below either
    /// current counter violates monotonicity and yields an
    /// `InvalidStatistics` business error carrying the old and new values.
    pub fn plan_update(&self, row: &StatsRow) -> Result<StatisticsUpdate, ProcessingError> {
        if row.login_count < self.login_count || row.post_count < self.post_count {
            return Err(ProcessingError::new(
                ProcessingErrorKind::InvalidStatistics,
                format!(
                    "statistics for user '{}' would decrease: logins {} -> {}, posts {} -> {}",
                    row.user_id, self.login_count, row.login_count, self.post_count, row.post_count
                ),
            )
            .with_metadata(json!({
                "user_id": row.user_id.as_str(),
                "old": { "login_count": self.login_count, "post_count": self.post_count },
                "new": { "login_count": row.login_count, "post_count": row.post_count },
            })));
        }

        Ok(StatisticsUpdate {
            user_id: row.user_id.clone(),
            previous_login_count: self.login_count,
            previous_post_count: self.post_count,
            new_login_count: row.login_count,
            new_post_count: row.post_count,
        })
    }
}

/// A planned monotonic counter update for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsUpdate {
    /// Subject user.
    pub user_id: StatsUserId,
    /// Login total before the update.
    pub previous_login_count: u64,
    /// Post total before the update.
    pub previous_post_count: u64,
    /// Login total after the update.
    pub new_login_count: u64,
    /// Post total after the update.
    pub new_post_count: u64,
}

impl StatisticsUpdate {
    /// Returns whether the login counter increases.
    #[must_use]
    pub fn login_increased(&self) -> bool {
        self.new_login_count > self.previous_login_count
    }

    /// Returns whether the post counter increases.
    #[must_use]
    pub fn post_increased(&self) -> bool {
        self.new_post_count > self.previous_post_count
    }

    /// Returns whether the update changes nothing.
    ///
    /// Replayed rows land here: new equals current, so the relational
    /// write and the audit append can both be skipped.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.login_increased() && !self.post_increased()
    }
}

/// One user record owned by the relational store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    /// Stable user identifier.
    pub user_id: StatsUserId,
    /// Display name.
    pub username: String,
    /// Contact address.
    pub email: String,
    /// Whether the account is active.
    pub active: bool,
    /// Record creation time.
    pub created_at: DateTime<Utc>,
    /// Last record update time.
    pub updated_at: DateTime<Utc>,
    /// Embedded statistics counters.
    pub statistics: UserStatistics,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use statsink_core::AppResult;

    use crate::error::ProcessingErrorKind;
    use crate::row::StatsRow;

    use super::UserStatistics;

    fn statistics(login_count: u64, post_count: u64) -> UserStatistics {
        UserStatistics {
            login_count,
            post_count,
            last_login_at: None,
            last_post_at: None,
            last_updated_at: Utc::now(),
        }
    }

    #[test]
    fn plans_upward_updates() -> AppResult<()> {
        let current = statistics(10, 20);
        let row = StatsRow::parse("U00001", "12", "25")?;

        let update = match current.plan_update(&row) {
            Ok(update) => update,
            Err(error) => panic!("expected planned update, got {error:?}"),
        };

        assert!(update.login_increased());
        assert!(update.post_increased());
        assert!(!update.is_noop());
        assert_eq!(update.new_login_count, 12);
        assert_eq!(update.new_post_count, 25);
        Ok(())
    }

    #[test]
    fn rejects_decreasing_counters() -> AppResult<()> {
        let current = statistics(10, 20);
        let row = StatsRow::parse("U00001", "5", "10")?;

        match current.plan_update(&row) {
            Err(error) => {
                assert_eq!(error.kind, ProcessingErrorKind::InvalidStatistics);
                assert_eq!(error.metadata["old"]["login_count"], 10);
                assert_eq!(error.metadata["new"]["login_count"], 5);
            }
            Ok(update) => panic!("expected monotonic guard violation, got {update:?}"),
        }
        Ok(())
    }

    #[test]
    fn equal_totals_plan_a_noop() -> AppResult<()> {
        let current = statistics(10, 20);
        let row = StatsRow::parse("U00001", "10", "20")?;

        match current.plan_update(&row) {
            Ok(update) => assert!(update.is_noop()),
            Err(error) => panic!("expected noop update, got {error:?}"),
        }
        Ok(())
    }

    #[test]
    fn one_sided_increase_is_not_a_noop() -> AppResult<()> {
        let current = statistics(10, 20);
        let row = StatsRow::parse("U00001", "11", "20")?;

        match current.plan_update(&row) {
            Ok(update) => {
                assert!(update.login_increased());
                assert!(!update.post_increased());
                assert!(!update.is_noop());
            }
            Err(error) => panic!("expected planned update, got {error:?}"),
        }
        Ok(())
    }
}
