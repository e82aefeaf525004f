//! Fake port implementations shared by service tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use statsink_core::{AppError, AppResult, RunId};
use statsink_domain::{
    AUDIT_RETENTION_DAYS, AuditEntry, AuditEntryDraft, Run, RunStatus, StatisticsUpdate,
    StatsUserId, UserAccount, UserStatistics,
};
use tokio::sync::Mutex;

use crate::ingest_ports::{
    ApplyStatisticsInput, AuditQuery, AuditRepository, CompleteRunInput, CreateRunInput,
    ObjectPayload, ObjectStore, PutObjectInput, RunCreation, RunMetadataRepository,
    StatisticsApplyOutcome, UserStatisticsRepository,
};

/// Builds a user account with the given counters.
pub fn user_account(user_id: &str, login_count: u64, post_count: u64) -> AppResult<UserAccount> {
    let now = Utc::now();
    Ok(UserAccount {
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
    })
}

#[derive(Default)]
pub struct FakeObjectStore {
    pub objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    pub puts: Mutex<Vec<PutObjectInput>>,
    pub transient_get_failures: AtomicU32,
    pub get_delay_ms: AtomicU64,
}

impl FakeObjectStore {
    pub async fn seed(&self, bucket: &str, key: &str, bytes: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .await
            .insert((bucket.to_owned(), key.to_owned()), bytes.into());
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> AppResult<ObjectPayload> {
        let delay_ms = self.get_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }

        if self
            .transient_get_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |failures| {
                failures.checked_sub(1)
            })
            .is_ok()
        {
            return Err(AppError::Storage("simulated storage outage".to_owned()));
        }

        let objects = self.objects.lock().await;
        let bytes = objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .ok_or_else(|| AppError::NotFound(format!("object '{bucket}/{key}'")))?;

        Ok(ObjectPayload {
            bytes: bytes.clone(),
            size: bytes.len() as u64,
            etag: None,
        })
    }

    async fn put_object(&self, input: PutObjectInput) -> AppResult<()> {
        self.objects.lock().await.insert(
            (input.bucket.clone(), input.key.clone()),
            input.bytes.clone(),
        );
        self.puts.lock().await.push(input);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeUserRepository {
    pub users: Mutex<HashMap<String, UserAccount>>,
    pub transient_failures: AtomicU32,
    pub apply_calls: AtomicU32,
}

impl FakeUserRepository {
    pub async fn seed(&self, user_id: &str, login_count: u64, post_count: u64) -> AppResult<()> {
        let account = user_account(user_id, login_count, post_count)?;
        self.users
            .lock()
            .await
            .insert(user_id.to_owned(), account);
        Ok(())
    }

    fn take_transient_failure(&self) -> bool {
        self.transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |failures| {
                failures.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl UserStatisticsRepository for FakeUserRepository {
    async fn find_user(&self, user_id: &StatsUserId) -> AppResult<Option<UserAccount>> {
        if self.take_transient_failure() {
            return Err(AppError::Database("simulated connection loss".to_owned()));
        }

        Ok(self.users.lock().await.get(user_id.as_str()).cloned())
    }

    async fn apply_statistics(
        &self,
        input: ApplyStatisticsInput,
    ) -> AppResult<StatisticsApplyOutcome> {
        if self.take_transient_failure() {
            return Err(AppError::Database("simulated connection loss".to_owned()));
        }

        self.apply_calls.fetch_add(1, Ordering::SeqCst);

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

#[derive(Default)]
pub struct FakeAuditRepository {
    pub entries: Mutex<Vec<AuditEntry>>,
    sequence: AtomicU64,
}

impl FakeAuditRepository {
    fn entry_from_draft(&self, draft: AuditEntryDraft) -> AuditEntry {
        AuditEntry {
            run_id: draft.run_id,
            timestamp: draft.timestamp,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            event_type: draft.event_type,
            level: draft.level,
            function_name: draft.function_name,
            message: draft.message,
            metadata: draft.metadata,
            correlation_id: draft.correlation_id,
            row_index: draft.row_index,
            retention_until: draft.timestamp + Duration::days(AUDIT_RETENTION_DAYS),
        }
    }
}

#[async_trait]
impl AuditRepository for FakeAuditRepository {
    async fn append_entry(&self, draft: AuditEntryDraft) -> AppResult<()> {
        let entry = self.entry_from_draft(draft);
        self.entries.lock().await.push(entry);
        Ok(())
    }

    async fn append_entries(&self, drafts: Vec<AuditEntryDraft>) -> AppResult<()> {
        let mut entries = self.entries.lock().await;
        for draft in drafts {
            let entry = self.entry_from_draft(draft);
            entries.push(entry);
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
        let filtered: Vec<AuditEntry> = entries
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
            .take(query.limit.max(1))
            .cloned()
            .collect();

        Ok(filtered)
    }
}

#[derive(Default)]
pub struct FakeRunMetadataRepository {
    pub runs: Mutex<HashMap<String, Run>>,
}

#[async_trait]
impl RunMetadataRepository for FakeRunMetadataRepository {
    async fn try_create_run(&self, input: CreateRunInput) -> AppResult<RunCreation> {
        let mut runs = self.runs.lock().await;

        if let Some(existing) = runs.get(input.run_id.as_str()) {
            return Ok(RunCreation::Duplicate(existing.clone()));
        }

        let run = Run {
            run_id: input.run_id.clone(),
            source_ref: input.source_ref,
            status: RunStatus::Running,
            total_rows: 0,
            success_count: 0,
            error_count: 0,
            started_at: input.started_at,
            ended_at: None,
            output_ref: None,
        };

        runs.insert(input.run_id.as_str().to_owned(), run.clone());
        Ok(RunCreation::Created(run))
    }

    async fn find_run(&self, run_id: &RunId) -> AppResult<Option<Run>> {
        Ok(self.runs.lock().await.get(run_id.as_str()).cloned())
    }

    async fn set_total_rows(&self, run_id: &RunId, total_rows: u64) -> AppResult<()> {
        let mut runs = self.runs.lock().await;
        let run = runs
            .get_mut(run_id.as_str())
            .ok_or_else(|| AppError::NotFound(format!("run '{run_id}'")))?;
        run.total_rows = total_rows;
        Ok(())
    }

    async fn record_progress(&self, run_id: &RunId, succeeded: u64, failed: u64) -> AppResult<()> {
        let mut runs = self.runs.lock().await;
        let run = runs
            .get_mut(run_id.as_str())
            .ok_or_else(|| AppError::NotFound(format!("run '{run_id}'")))?;
        run.success_count = run.success_count.saturating_add(succeeded);
        run.error_count = run.error_count.saturating_add(failed);
        Ok(())
    }

    async fn complete_run(&self, input: CompleteRunInput) -> AppResult<Run> {
        let mut runs = self.runs.lock().await;
        let run = runs
            .get_mut(input.run_id.as_str())
            .ok_or_else(|| AppError::NotFound(format!("run '{}'", input.run_id)))?;

        if run.status.is_terminal() {
            return Ok(run.clone());
        }

        if !run.status.can_transition_to(input.status) {
            return Err(AppError::Conflict(format!(
                "run '{}' cannot transition from '{}' to '{}'",
                input.run_id,
                run.status.as_str(),
                input.status.as_str()
            )));
        }

        run.status = input.status;
        run.total_rows = input.total_rows;
        run.success_count = input.success_count;
        run.error_count = input.error_count;
        run.ended_at = Some(input.ended_at);
        run.output_ref = input.output_ref;

        Ok(run.clone())
    }

    async fn list_recent_runs(&self, limit: usize) -> AppResult<Vec<Run>> {
        let runs = self.runs.lock().await;
        let mut listed: Vec<Run> = runs.values().cloned().collect();
        listed.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        listed.truncate(limit);
        Ok(listed)
    }
}
