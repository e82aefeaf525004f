//! Redis-backed append-only audit log.

use async_trait::async_trait;
use chrono::Duration;
use redis::AsyncCommands;

use statsink_application::{AUDIT_WRITE_CHUNK, AuditQuery, AuditRepository};
use statsink_core::{AppError, AppResult, RunId};
use statsink_domain::{AUDIT_RETENTION_DAYS, AuditEntry, AuditEntryDraft};

use crate::record_sanitizer::sanitize_value;

/// Redis implementation of the audit repository.
///
/// Entries for one run live in a list keyed by `run_id`; a companion set
/// tracks the `(run_id, row_index)` natural keys for replay dedup, and a
/// counter assigns the per-run sequence. All keys expire with the
/// retention window, which is the only deletion path.
#[derive(Clone)]
pub struct RedisAuditRepository {
    client: redis::Client,
    key_prefix: String,
    retention_days: i64,
}

impl RedisAuditRepository {
    /// Creates one repository adapter with the default retention.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            retention_days: AUDIT_RETENTION_DAYS,
        }
    }

    /// Overrides the retention window.
    #[must_use]
    pub fn with_retention_days(mut self, retention_days: i64) -> Self {
        self.retention_days = retention_days.max(1);
        self
    }

    fn entries_key(&self, run_id: &RunId) -> String {
        format!("{}:entries:{run_id}", self.key_prefix)
    }

    fn rows_key(&self, run_id: &RunId) -> String {
        format!("{}:rows:{run_id}", self.key_prefix)
    }

    fn sequence_key(&self, run_id: &RunId) -> String {
        format!("{}:seq:{run_id}", self.key_prefix)
    }

    fn retention_seconds(&self) -> i64 {
        Duration::days(self.retention_days).num_seconds()
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::KeyValue(format!("failed to connect to redis: {error}")))
    }

    async fn append_chunk(
        &self,
        connection: &mut redis::aio::MultiplexedConnection,
        drafts: &[AuditEntryDraft],
    ) -> AppResult<()> {
        let mut pipeline = redis::pipe();

        for draft in drafts {
            let sequence: u64 = connection
                .incr(self.sequence_key(&draft.run_id), 1_u64)
                .await
                .map_err(|error| {
                    AppError::KeyValue(format!("failed to assign audit sequence: {error}"))
                })?;

            let entry = AuditEntry {
                run_id: draft.run_id.clone(),
                timestamp: draft.timestamp,
                sequence,
                event_type: draft.event_type,
                level: draft.level,
                function_name: draft.function_name.clone(),
                message: draft.message.clone(),
                metadata: sanitize_value(&draft.metadata),
                correlation_id: draft.correlation_id.clone(),
                row_index: draft.row_index,
                retention_until: draft.timestamp + Duration::days(self.retention_days),
            };

            let payload = serde_json::to_string(&sanitize_value(
                &serde_json::to_value(&entry).map_err(|error| {
                    AppError::Internal(format!("failed to encode audit entry: {error}"))
                })?,
            ))
            .map_err(|error| {
                AppError::Internal(format!("failed to encode audit entry: {error}"))
            })?;

            pipeline
                .rpush(self.entries_key(&entry.run_id), payload)
                .ignore();
            if let Some(row_index) = entry.row_index {
                pipeline
                    .sadd(self.rows_key(&entry.run_id), row_index)
                    .ignore();
            }
            pipeline
                .expire(self.entries_key(&entry.run_id), self.retention_seconds())
                .ignore();
            pipeline
                .expire(self.rows_key(&entry.run_id), self.retention_seconds())
                .ignore();
            pipeline
                .expire(self.sequence_key(&entry.run_id), self.retention_seconds())
                .ignore();
        }

        pipeline
            .query_async::<()>(connection)
            .await
            .map_err(|error| {
                AppError::KeyValue(format!("failed to append audit entries: {error}"))
            })
    }
}

#[async_trait]
impl AuditRepository for RedisAuditRepository {
    async fn append_entry(&self, draft: AuditEntryDraft) -> AppResult<()> {
        let mut connection = self.connection().await?;
        self.append_chunk(&mut connection, std::slice::from_ref(&draft))
            .await
    }

    async fn append_entries(&self, drafts: Vec<AuditEntryDraft>) -> AppResult<()> {
        if drafts.is_empty() {
            return Ok(());
        }

        let mut connection = self.connection().await?;
        for chunk in drafts.chunks(AUDIT_WRITE_CHUNK) {
            self.append_chunk(&mut connection, chunk).await?;
        }

        Ok(())
    }

    async fn has_row_entry(&self, run_id: &RunId, row_index: u64) -> AppResult<bool> {
        let mut connection = self.connection().await?;

        connection
            .sismember(self.rows_key(run_id), row_index)
            .await
            .map_err(|error| {
                AppError::KeyValue(format!("failed to check audit row key: {error}"))
            })
    }

    async fn list_entries(&self, run_id: &RunId, query: AuditQuery) -> AppResult<Vec<AuditEntry>> {
        let mut connection = self.connection().await?;

        let payloads: Vec<String> = connection
            .lrange(self.entries_key(run_id), 0, -1)
            .await
            .map_err(|error| {
                AppError::KeyValue(format!("failed to list audit entries: {error}"))
            })?;

        let capped_limit = query.limit.clamp(1, 200);
        let entries = payloads
            .iter()
            .rev()
            .filter_map(|payload| serde_json::from_str::<AuditEntry>(payload).ok())
            .filter(|entry| query.level.is_none_or(|level| entry.level == level))
            .filter(|entry| {
                query
                    .event_type
                    .is_none_or(|event_type| entry.event_type == event_type)
            })
            .skip(query.offset)
            .take(capped_limit)
            .collect();

        Ok(entries)
    }
}
