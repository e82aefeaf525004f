use async_trait::async_trait;
use statsink_core::{AppResult, RunId};
use statsink_domain::{AuditEntry, AuditEntryDraft, AuditEventType, AuditLevel};

/// Chunk size for batched audit writes, matching the KV store's
/// bulk-write limit.
pub const AUDIT_WRITE_CHUNK: usize = 25;

/// Filter for audit reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditQuery {
    /// Restrict to one severity.
    pub level: Option<AuditLevel>,
    /// Restrict to one event type.
    pub event_type: Option<AuditEventType>,
    /// Maximum entries returned; adapters cap this.
    pub limit: usize,
    /// Entries skipped from the newest end.
    pub offset: usize,
}

/// Repository port for the append-only audit log.
///
/// Entries are never mutated after the write; the store assigns the
/// per-run sequence and the retention horizon, and deletes entries only
/// through retention expiry.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Appends one entry.
    async fn append_entry(&self, draft: AuditEntryDraft) -> AppResult<()>;

    /// Appends many entries, chunked at [`AUDIT_WRITE_CHUNK`].
    async fn append_entries(&self, drafts: Vec<AuditEntryDraft>) -> AppResult<()>;

    /// Returns whether a row-scoped entry already exists for
    /// `(run_id, row_index)`.
    ///
    /// Used to skip duplicate `USER_UPDATE` appends when a batch is
    /// replayed.
    async fn has_row_entry(&self, run_id: &RunId, row_index: u64) -> AppResult<bool>;

    /// Lists entries for one run, newest first.
    async fn list_entries(&self, run_id: &RunId, query: AuditQuery) -> AppResult<Vec<AuditEntry>>;
}
