use async_trait::async_trait;
use chrono::{DateTime, Utc};
use statsink_core::AppResult;
use statsink_domain::{StatsUserId, StatisticsUpdate, UserAccount};

/// Input for one transactional statistics write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyStatisticsInput {
    /// Subject user.
    pub user_id: StatsUserId,
    /// New authoritative login total.
    pub new_login_count: u64,
    /// New authoritative post total.
    pub new_post_count: u64,
    /// Write time used for `updated_at` and the activity timestamps.
    pub applied_at: DateTime<Utc>,
}

/// Result of one conditional statistics write.
///
/// The adapter re-checks the monotonic guard inside its transaction, so a
/// concurrent writer can surface `GuardViolation` even after the service
/// planned a valid update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatisticsApplyOutcome {
    /// Counters moved upward and both rows were committed.
    Applied(StatisticsUpdate),
    /// New totals equal the current totals; nothing was written.
    NoChange(StatisticsUpdate),
    /// The guard rejected the write because a counter would decrease.
    GuardViolation {
        /// Login total currently stored.
        current_login_count: u64,
        /// Post total currently stored.
        current_post_count: u64,
    },
    /// The user row disappeared between load and write.
    UserMissing,
}

/// Repository port for user rows and their embedded statistics.
///
/// The relational store is the single consistency anchor: every mutation
/// goes through [`apply_statistics`](Self::apply_statistics), one
/// transaction per row, with the monotonic guard in the `UPDATE` clause.
#[async_trait]
pub trait UserStatisticsRepository: Send + Sync {
    /// Loads one user with embedded statistics.
    async fn find_user(&self, user_id: &StatsUserId) -> AppResult<Option<UserAccount>>;

    /// Applies new authoritative totals in a single transaction.
    ///
    /// Updates the user's `updated_at`, sets the new counters, and bumps
    /// `last_login_at`/`last_post_at` only for counters that increased.
    async fn apply_statistics(
        &self,
        input: ApplyStatisticsInput,
    ) -> AppResult<StatisticsApplyOutcome>;
}
