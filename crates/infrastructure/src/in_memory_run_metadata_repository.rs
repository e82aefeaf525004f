//! In-memory adapter for the run-metadata port.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use statsink_application::{
    CompleteRunInput, CreateRunInput, RunCreation, RunMetadataRepository,
};
use statsink_core::{AppError, AppResult, RunId};
use statsink_domain::{Run, RunStatus};

/// In-memory run-metadata store with the same conditional-write
/// semantics as the Redis adapter.
#[derive(Default)]
pub struct InMemoryRunMetadataRepository {
    runs: Mutex<HashMap<String, Run>>,
}

impl InMemoryRunMetadataRepository {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunMetadataRepository for InMemoryRunMetadataRepository {
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

        // Terminal status is monotone: the first completion wins.
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
        listed.truncate(limit.clamp(1, 200));
        Ok(listed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use statsink_application::{
        CompleteRunInput, CreateRunInput, RunCreation, RunMetadataRepository,
    };
    use statsink_core::{AppResult, RunId};
    use statsink_domain::RunStatus;

    use super::InMemoryRunMetadataRepository;

    #[tokio::test]
    async fn second_create_returns_the_existing_run() -> AppResult<()> {
        let repository = InMemoryRunMetadataRepository::new();
        let input = CreateRunInput {
            run_id: RunId::new("users-120000")?,
            source_ref: "input/users.csv".to_owned(),
            started_at: Utc::now(),
        };

        let first = repository.try_create_run(input.clone()).await?;
        let second = repository.try_create_run(input).await?;

        assert!(matches!(first, RunCreation::Created(_)));
        assert!(matches!(second, RunCreation::Duplicate(_)));
        Ok(())
    }

    #[tokio::test]
    async fn terminal_status_never_reverts() -> AppResult<()> {
        let repository = InMemoryRunMetadataRepository::new();
        let run_id = RunId::new("users-120000")?;
        repository
            .try_create_run(CreateRunInput {
                run_id: run_id.clone(),
                source_ref: "input/users.csv".to_owned(),
                started_at: Utc::now(),
            })
            .await?;

        let completed = repository
            .complete_run(CompleteRunInput {
                run_id: run_id.clone(),
                status: RunStatus::Succeeded,
                total_rows: 3,
                success_count: 3,
                error_count: 0,
                ended_at: Utc::now(),
                output_ref: Some("output/results/artifact.json.gz".to_owned()),
            })
            .await?;
        assert_eq!(completed.status, RunStatus::Succeeded);

        let replay = repository
            .complete_run(CompleteRunInput {
                run_id,
                status: RunStatus::Failed,
                total_rows: 3,
                success_count: 0,
                error_count: 3,
                ended_at: Utc::now(),
                output_ref: None,
            })
            .await?;
        assert_eq!(replay.status, RunStatus::Succeeded);
        assert_eq!(replay.success_count, 3);
        Ok(())
    }
}
