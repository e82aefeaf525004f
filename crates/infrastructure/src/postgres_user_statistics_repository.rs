//! PostgreSQL-backed repository for user rows and statistics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use statsink_application::{
    ApplyStatisticsInput, StatisticsApplyOutcome, UserStatisticsRepository,
};
use statsink_core::{AppError, AppResult};
use statsink_domain::{StatisticsUpdate, StatsUserId, UserAccount, UserStatistics};

/// PostgreSQL implementation of the user-statistics repository.
///
/// The monotonic guard lives in the `UPDATE ... WHERE` clause, so even a
/// concurrent writer that slipped past the planning check cannot move a
/// counter downward. Row-level locks on `user_statistics` serialize
/// concurrent updates to the same user across runs.
#[derive(Clone)]
pub struct PostgresUserStatisticsRepository {
    pool: PgPool,
}

impl PostgresUserStatisticsRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    user_id: String,
    username: String,
    email: String,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    login_count: Option<i64>,
    post_count: Option<i64>,
    last_login_at: Option<DateTime<Utc>>,
    last_post_at: Option<DateTime<Utc>>,
    last_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct CounterRow {
    login_count: i64,
    post_count: i64,
}

#[async_trait]
impl UserStatisticsRepository for PostgresUserStatisticsRepository {
    async fn find_user(&self, user_id: &StatsUserId) -> AppResult<Option<UserAccount>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT
                u.user_id,
                u.username,
                u.email,
                u.active,
                u.created_at,
                u.updated_at,
                s.login_count,
                s.post_count,
                s.last_login_at,
                s.last_post_at,
                s.last_updated_at
            FROM users u
            LEFT JOIN user_statistics s ON s.user_id = u.user_id
            WHERE u.user_id = $1
            "#,
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Database(format!("failed to load user '{user_id}': {error}"))
        })?;

        row.map(user_account_from_row).transpose()
    }

    async fn apply_statistics(
        &self,
        input: ApplyStatisticsInput,
    ) -> AppResult<StatisticsApplyOutcome> {
        let new_login_count = counter_to_db(input.new_login_count)?;
        let new_post_count = counter_to_db(input.new_post_count)?;

        let mut tx = self.pool.begin().await.map_err(|error| {
            AppError::Database(format!("failed to begin transaction: {error}"))
        })?;

        // Missing statistics rows are created lazily at their first write.
        sqlx::query(
            r#"
            INSERT INTO user_statistics (user_id, login_count, post_count, last_updated_at)
            VALUES ($1, 0, 0, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(input.user_id.as_str())
        .bind(input.applied_at)
        .execute(&mut *tx)
        .await
        .map_err(|error| {
            AppError::Database(format!(
                "failed to ensure statistics row for '{}': {error}",
                input.user_id
            ))
        })?;

        let current = sqlx::query_as::<_, CounterRow>(
            r#"
            SELECT s.login_count, s.post_count
            FROM user_statistics s
            JOIN users u ON u.user_id = s.user_id
            WHERE s.user_id = $1
            FOR UPDATE OF s
            "#,
        )
        .bind(input.user_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|error| {
            AppError::Database(format!(
                "failed to lock statistics for '{}': {error}",
                input.user_id
            ))
        })?;

        let Some(current) = current else {
            return Ok(StatisticsApplyOutcome::UserMissing);
        };

        if new_login_count < current.login_count || new_post_count < current.post_count {
            return Ok(StatisticsApplyOutcome::GuardViolation {
                current_login_count: counter_from_db(current.login_count)?,
                current_post_count: counter_from_db(current.post_count)?,
            });
        }

        let update = StatisticsUpdate {
            user_id: input.user_id.clone(),
            previous_login_count: counter_from_db(current.login_count)?,
            previous_post_count: counter_from_db(current.post_count)?,
            new_login_count: input.new_login_count,
            new_post_count: input.new_post_count,
        };

        if update.is_noop() {
            // Replayed row: nothing to write, the open transaction rolls
            // back on drop.
            return Ok(StatisticsApplyOutcome::NoChange(update));
        }

        let guarded = sqlx::query(
            r#"
            UPDATE user_statistics
            SET
                login_count = $2,
                post_count = $3,
                last_login_at = CASE WHEN $2 > login_count THEN $4 ELSE last_login_at END,
                last_post_at = CASE WHEN $3 > post_count THEN $4 ELSE last_post_at END,
                last_updated_at = $4
            WHERE user_id = $1 AND $2 >= login_count AND $3 >= post_count
            "#,
        )
        .bind(input.user_id.as_str())
        .bind(new_login_count)
        .bind(new_post_count)
        .bind(input.applied_at)
        .execute(&mut *tx)
        .await
        .map_err(|error| {
            AppError::Database(format!(
                "failed to update statistics for '{}': {error}",
                input.user_id
            ))
        })?;

        if guarded.rows_affected() == 0 {
            return Ok(StatisticsApplyOutcome::GuardViolation {
                current_login_count: update.previous_login_count,
                current_post_count: update.previous_post_count,
            });
        }

        sqlx::query("UPDATE users SET updated_at = $2 WHERE user_id = $1")
            .bind(input.user_id.as_str())
            .bind(input.applied_at)
            .execute(&mut *tx)
            .await
            .map_err(|error| {
                AppError::Database(format!(
                    "failed to touch user '{}': {error}",
                    input.user_id
                ))
            })?;

        tx.commit().await.map_err(|error| {
            AppError::Database(format!(
                "failed to commit statistics update for '{}': {error}",
                input.user_id
            ))
        })?;

        Ok(StatisticsApplyOutcome::Applied(update))
    }
}

fn user_account_from_row(row: UserRow) -> AppResult<UserAccount> {
    Ok(UserAccount {
        user_id: StatsUserId::new(row.user_id)?,
        username: row.username,
        email: row.email,
        active: row.active,
        created_at: row.created_at,
        updated_at: row.updated_at,
        statistics: UserStatistics {
            login_count: counter_from_db(row.login_count.unwrap_or(0))?,
            post_count: counter_from_db(row.post_count.unwrap_or(0))?,
            last_login_at: row.last_login_at,
            last_post_at: row.last_post_at,
            last_updated_at: row.last_updated_at.unwrap_or(row.updated_at),
        },
    })
}

fn counter_to_db(value: u64) -> AppResult<i64> {
    i64::try_from(value)
        .map_err(|error| AppError::Validation(format!("counter value out of range: {error}")))
}

fn counter_from_db(value: i64) -> AppResult<u64> {
    u64::try_from(value).map_err(|error| {
        AppError::Database(format!("stored counter is negative ({value}): {error}"))
    })
}
