//! In-memory adapter for the user-statistics port.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use statsink_application::{
    ApplyStatisticsInput, StatisticsApplyOutcome, UserStatisticsRepository,
};
use statsink_core::AppResult;
use statsink_domain::{StatisticsUpdate, StatsUserId, UserAccount, UserStatistics};

/// In-memory user store with the same monotonic-guard semantics as the
/// PostgreSQL adapter.
#[derive(Default)]
pub struct InMemoryUserStatisticsRepository {
    users: Mutex<HashMap<String, UserAccount>>,
}

impl InMemoryUserStatisticsRepository {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds one active user with the given counters.
    pub async fn seed(
        &self,
        user_id: &str,
        login_count: u64,
        post_count: u64,
    ) -> AppResult<()> {
        let now = Utc::now();
        let account = UserAccount {
            user_id: StatsUserId::new(user_id)?,
            username: format!("user-{user_id}"),
            email: format!("{user_id}@example.test"),
            active: true,
            created_at: now,
            updated_at: now,
            statistics: UserStatistics {
                login_count,
                post_count,
                last_login_at: None,
                last_post_at: None,
                last_updated_at: now,
            },
        };

        self.users.lock().await.insert(user_id.to_owned(), account);
        Ok(())
    }

    /// Returns one user snapshot.
    pub async fn snapshot(&self, user_id: &str) -> Option<UserAccount> {
        self.users.lock().await.get(user_id).cloned()
    }
}

#[async_trait]
impl UserStatisticsRepository for InMemoryUserStatisticsRepository {
    async fn find_user(&self, user_id: &StatsUserId) -> AppResult<Option<UserAccount>> {
        Ok(self.users.lock().await.get(user_id.as_str()).cloned())
    }

    async fn apply_statistics(
        &self,
        input: ApplyStatisticsInput,
    ) -> AppResult<StatisticsApplyOutcome> {
        let mut users = self.users.lock().await;
        let Some(account) = users.get_mut(input.user_id.as_str()) else {
            return Ok(StatisticsApplyOutcome::UserMissing);
        };

        let current = &account.statistics;
        if input.new_login_count < current.login_count
            || input.new_post_count < current.post_count
        {
            return Ok(StatisticsApplyOutcome::GuardViolation {
                current_login_count: current.login_count,
                current_post_count: current.post_count,
            });
        }

        let update = StatisticsUpdate {
            user_id: input.user_id.clone(),
            previous_login_count: current.login_count,
            previous_post_count: current.post_count,
            new_login_count: input.new_login_count,
            new_post_count: input.new_post_count,
        };

        if update.is_noop() {
            return Ok(StatisticsApplyOutcome::NoChange(update));
        }

        if update.login_increased() {
            account.statistics.last_login_at = Some(input.applied_at);
        }
        if update.post_increased() {
            account.statistics.last_post_at = Some(input.applied_at);
        }
        account.statistics.login_count = input.new_login_count;
        account.statistics.post_count = input.new_post_count;
        account.statistics.last_updated_at = input.applied_at;
        account.updated_at = input.applied_at;

        Ok(StatisticsApplyOutcome::Applied(update))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use statsink_application::{
        ApplyStatisticsInput, StatisticsApplyOutcome, UserStatisticsRepository,
    };
    use statsink_core::AppResult;
    use statsink_domain::StatsUserId;

    use super::InMemoryUserStatisticsRepository;

    #[tokio::test]
    async fn guard_rejects_downward_writes() -> AppResult<()> {
        let repository = InMemoryUserStatisticsRepository::new();
        repository.seed("U00001", 10, 20).await?;

        let outcome = repository
            .apply_statistics(ApplyStatisticsInput {
                user_id: StatsUserId::new("U00001")?,
                new_login_count: 5,
                new_post_count: 10,
                applied_at: Utc::now(),
            })
            .await?;

        assert!(matches!(
            outcome,
            StatisticsApplyOutcome::GuardViolation {
                current_login_count: 10,
                current_post_count: 20,
            }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn replayed_writes_are_no_change() -> AppResult<()> {
        let repository = InMemoryUserStatisticsRepository::new();
        repository.seed("U00001", 10, 20).await?;

        let outcome = repository
            .apply_statistics(ApplyStatisticsInput {
                user_id: StatsUserId::new("U00001")?,
                new_login_count: 10,
                new_post_count: 20,
                applied_at: Utc::now(),
            })
            .await?;

        assert!(matches!(outcome, StatisticsApplyOutcome::NoChange(_)));
        Ok(())
    }
}
