//! In-memory adapter for the audit port.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::Mutex;

use statsink_application::{AUDIT_WRITE_CHUNK, AuditQuery, AuditRepository};
use statsink_core::{AppResult, RunId};
use statsink_domain::{AUDIT_RETENTION_DAYS, AuditEntry, AuditEntryDraft};

use crate::record_sanitizer::sanitize_value;

/// In-memory append-only audit log.
#[derive(Default)]
pub struct InMemoryAuditRepository {
    entries: Mutex<Vec<AuditEntry>>,
    sequence: AtomicU64,
}

impl InMemoryAuditRepository {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every stored entry in append order.
    pub async fn all_entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }

    fn entry_from_draft(&self, draft: AuditEntryDraft) -> AuditEntry {
        AuditEntry {
            run_id: draft.run_id,
            timestamp: draft.timestamp,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            event_type: draft.event_type,
            level: draft.level,
            function_name: draft.function_name,
            message: draft.message,
            metadata: sanitize_value(&draft.metadata),
            correlation_id: draft.correlation_id,
            row_index: draft.row_index,
            retention_until: draft.timestamp + Duration::days(AUDIT_RETENTION_DAYS),
        }
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn append_entry(&self, draft: AuditEntryDraft) -> AppResult<()> {
        let entry = self.entry_from_draft(draft);
        self.entries.lock().await.push(entry);
        Ok(())
    }

    async fn append_entries(&self, drafts: Vec<AuditEntryDraft>) -> AppResult<()> {
        for chunk in drafts.chunks(AUDIT_WRITE_CHUNK) {
            let mut entries = self.entries.lock().await;
            for draft in chunk {
                let entry = self.entry_from_draft(draft.clone());
                entries.push(entry);
            }
        }
        Ok(())
    }

    async fn has_row_entry(&self, run_id: &RunId, row_index: u64) -> AppResult<bool> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .any(|entry| entry.run_id == *run_id && entry.row_index == Some(row_index)))
    }

    async fn list_entries(&self, run_id: &RunId, query: AuditQuery) -> AppResult<Vec<AuditEntry>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .rev()
            .filter(|entry| entry.run_id == *run_id)
            .filter(|entry| query.level.is_none_or(|level| entry.level == level))
            .filter(|entry| {
                query
                    .event_type
                    .is_none_or(|event_type| entry.event_type == event_type)
            })
            .skip(query.offset)
            .take(query.limit.clamp(1, 200))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use statsink_application::{AuditQuery, AuditRepository};
    use statsink_core::{AppResult, RunId};
    use statsink_domain::{AuditEntryDraft, AuditEventType, AuditLevel};

    use super::InMemoryAuditRepository;

    #[tokio::test]
    async fn assigns_increasing_sequences_and_filters_by_level() -> AppResult<()> {
        let repository = InMemoryAuditRepository::new();
        let run_id = RunId::new("users-120000")?;

        repository
            .append_entry(AuditEntryDraft::new(
                run_id.clone(),
                AuditEventType::RunStarted,
                AuditLevel::Info,
                "run_dispatcher",
                "run started",
            ))
            .await?;
        repository
            .append_entry(
                AuditEntryDraft::new(
                    run_id.clone(),
                    AuditEventType::UserUpdate,
                    AuditLevel::Error,
                    "batch_worker",
                    "user missing",
                )
                .with_row_index(0),
            )
            .await?;

        let errors = repository
            .list_entries(
                &run_id,
                AuditQuery {
                    level: Some(AuditLevel::Error),
                    event_type: None,
                    limit: 10,
                    offset: 0,
                },
            )
            .await?;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].event_type, AuditEventType::UserUpdate);

        assert!(repository.has_row_entry(&run_id, 0).await?);
        assert!(!repository.has_row_entry(&run_id, 1).await?);

        let all = repository.all_entries().await;
        assert!(all[0].sequence < all[1].sequence);
        Ok(())
    }
}
