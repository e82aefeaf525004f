use std::sync::Arc;

use serde_json::json;
use statsink_core::{AppError, AppResult};
use statsink_domain::{AuditEventType, RunStatus};

use crate::event::ParsedEvent;
use crate::test_support::{FakeAuditRepository, FakeRunMetadataRepository};

use super::{DispatchOutcome, RunDispatcher};

const MAX_SIZE: u64 = 100 * 1024 * 1024;

fn dispatcher() -> (
    RunDispatcher,
    Arc<FakeRunMetadataRepository>,
    Arc<FakeAuditRepository>,
) {
    let run_metadata = Arc::new(FakeRunMetadataRepository::default());
    let audit = Arc::new(FakeAuditRepository::default());
    let dispatcher = RunDispatcher::new(run_metadata.clone(), audit.clone(), MAX_SIZE);
    (dispatcher, run_metadata, audit)
}

fn storage_event(key: &str, size: u64) -> ParsedEvent {
    ParsedEvent::parse(&json!({
        "bucket": "ingest-input",
        "key": key,
        "size": size,
    }))
}

/// Waits out the tail of the current second so both submissions in a
/// duplicate-start test derive the same `-HHMMSS` run id suffix.
async fn align_to_second_start() {
    let millis = u64::from(chrono::Utc::now().timestamp_subsec_millis());
    if millis > 800 {
        tokio::time::sleep(std::time::Duration::from_millis(1_050 - millis)).await;
    }
}

#[tokio::test]
async fn accepts_the_first_start_and_audits_it() -> AppResult<()> {
    let (dispatcher, _, audit) = dispatcher();

    let outcome = dispatcher
        .start(&storage_event("incoming/users.csv", 1024))
        .await?;

    let run = match outcome {
        DispatchOutcome::Accepted(run) => run,
        DispatchOutcome::Duplicate(run) => panic!("expected accepted, got duplicate {run:?}"),
    };

    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.source_ref, "ingest-input/incoming/users.csv");
    assert!(run.run_id.as_str().starts_with("users-"));

    let entries = audit.entries.lock().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event_type, AuditEventType::RunStarted);
    Ok(())
}

#[tokio::test]
async fn duplicate_start_leaves_the_existing_run_untouched() -> AppResult<()> {
    let (dispatcher, run_metadata, audit) = dispatcher();
    let event = storage_event("incoming/users.csv", 1024);

    align_to_second_start().await;
    let first = dispatcher.start(&event).await?;
    let second = dispatcher.start(&event).await?;

    let first_run = match first {
        DispatchOutcome::Accepted(run) => run,
        DispatchOutcome::Duplicate(run) => panic!("expected accepted, got duplicate {run:?}"),
    };
    match second {
        DispatchOutcome::Duplicate(run) => assert_eq!(run.run_id, first_run.run_id),
        DispatchOutcome::Accepted(run) => panic!("expected duplicate, got accepted {run:?}"),
    }

    assert_eq!(run_metadata.runs.lock().await.len(), 1);
    // Only the accepted start writes a RUN_STARTED entry.
    assert_eq!(audit.entries.lock().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn rejects_events_without_a_storage_object() {
    let (dispatcher, _, _) = dispatcher();
    let event = ParsedEvent::parse(&json!({ "path": "/runs", "httpMethod": "POST" }));

    let result = dispatcher.start(&event).await;
    assert!(matches!(result, Err(AppError::Configuration(_))));
}

#[tokio::test]
async fn rejects_non_csv_and_oversized_objects() {
    let (dispatcher, _, _) = dispatcher();

    let non_csv = dispatcher.start(&storage_event("users.parquet", 10)).await;
    assert!(matches!(non_csv, Err(AppError::Configuration(_))));

    let oversized = dispatcher
        .start(&storage_event("users.csv", MAX_SIZE + 1))
        .await;
    assert!(matches!(oversized, Err(AppError::Configuration(_))));
}
