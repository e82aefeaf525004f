//! Application services and ports for the ingestion engine.

#![forbid(unsafe_code)]

mod aggregation_service;
mod config;
mod contracts;
mod dispatch_service;
mod event;
mod ingest_ports;
mod pipeline_service;
mod retry;
#[cfg(test)]
mod test_support;
mod validation_service;
mod worker_service;

pub use aggregation_service::{AggregationReport, Aggregator};
pub use config::PipelineConfig;
pub use contracts::{
    ExecutionContext, ExecutionDescriptor, ProcessingConfig, ProcessingDescriptor,
    StateMachineInput, StorageDescriptor, WireRow, WorkerBatchInput, WorkerBatchOutput,
};
pub use dispatch_service::{DispatchOutcome, RunDispatcher};
pub use event::{ParsedEvent, StorageObjectRef, is_ingestible_csv};
pub use ingest_ports::{
    AUDIT_WRITE_CHUNK, ApplyStatisticsInput, AuditQuery, AuditRepository, CompleteRunInput,
    CreateRunInput, ObjectPayload, ObjectStore, PutObjectInput, RunCreation,
    RunMetadataRepository, StatisticsApplyOutcome, UserStatisticsRepository,
};
pub use pipeline_service::{IngestionPipeline, PipelineOutcome};
pub use retry::{RetryPolicy, retry_transient};
pub use validation_service::{
    CsvValidator, DEFAULT_MAX_FILE_SIZE_BYTES, ValidationResult, ValidationStatistics,
};
pub use worker_service::BatchWorker;
