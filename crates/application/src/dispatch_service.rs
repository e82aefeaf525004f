//! Run dispatch: derives the run id and rejects duplicate starts.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use statsink_core::{AppError, AppResult};
use statsink_domain::{AuditEntryDraft, AuditEventType, AuditLevel, Run, run_id_from_object_key};

use crate::event::{ParsedEvent, StorageObjectRef, is_ingestible_csv};
use crate::ingest_ports::{AuditRepository, CreateRunInput, RunCreation, RunMetadataRepository};

/// Outcome of one dispatch attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A new run was created and may proceed.
    Accepted(Run),
    /// A run already exists for the derived id; the existing run is
    /// untouched and the caller must not start another.
    Duplicate(Run),
}

/// Run dispatcher.
///
/// The conditional create on the run-metadata row is the primary dedup
/// mechanism: identical uploads derive the same run id and only the first
/// start wins.
pub struct RunDispatcher {
    run_metadata: Arc<dyn RunMetadataRepository>,
    audit: Arc<dyn AuditRepository>,
    max_file_size_bytes: u64,
}

impl RunDispatcher {
    /// Creates the dispatcher.
    #[must_use]
    pub fn new(
        run_metadata: Arc<dyn RunMetadataRepository>,
        audit: Arc<dyn AuditRepository>,
        max_file_size_bytes: u64,
    ) -> Self {
        Self {
            run_metadata,
            audit,
            max_file_size_bytes,
        }
    }

    /// Starts a run for one trigger event.
    ///
    /// Fails with `AppError::Configuration` when the event carries no
    /// usable storage reference or references a non-ingestible object.
    pub async fn start(&self, event: &ParsedEvent) -> AppResult<DispatchOutcome> {
        let object = self.ingestible_object(event)?;
        let started_at = Utc::now();
        let run_id = run_id_from_object_key(object.key.as_str(), started_at)?;

        let creation = self
            .run_metadata
            .try_create_run(CreateRunInput {
                run_id: run_id.clone(),
                source_ref: object.source_ref(),
                started_at,
            })
            .await?;

        match creation {
            RunCreation::Created(run) => {
                self.audit
                    .append_entry(
                        AuditEntryDraft::new(
                            run_id,
                            AuditEventType::RunStarted,
                            AuditLevel::Info,
                            "run_dispatcher",
                            format!("run started for '{}'", run.source_ref),
                        )
                        .with_metadata(json!({
                            "source_ref": run.source_ref,
                            "bucket": object.bucket,
                            "key": object.key,
                        })),
                    )
                    .await?;

                Ok(DispatchOutcome::Accepted(run))
            }
            RunCreation::Duplicate(run) => Ok(DispatchOutcome::Duplicate(run)),
        }
    }

    fn ingestible_object<'event>(
        &self,
        event: &'event ParsedEvent,
    ) -> AppResult<&'event StorageObjectRef> {
        let object = event.storage_object().ok_or_else(|| {
            AppError::Configuration(
                "trigger event carries no storage object reference".to_owned(),
            )
        })?;

        if object.bucket.trim().is_empty() || object.key.trim().is_empty() {
            return Err(AppError::Configuration(
                "trigger event bucket and key must not be empty".to_owned(),
            ));
        }

        if !is_ingestible_csv(object.key.as_str(), object.size, self.max_file_size_bytes) {
            return Err(AppError::Configuration(format!(
                "object '{}' is not an ingestible CSV within {} bytes",
                object.key, self.max_file_size_bytes
            )));
        }

        Ok(object)
    }
}

#[cfg(test)]
mod tests;
