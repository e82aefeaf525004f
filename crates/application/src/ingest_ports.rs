//! Ports implemented by infrastructure adapters.

mod audit;
mod object_store;
mod run_metadata;
mod user_store;

pub use audit::{AUDIT_WRITE_CHUNK, AuditQuery, AuditRepository};
pub use object_store::{ObjectPayload, ObjectStore, PutObjectInput};
pub use run_metadata::{CompleteRunInput, CreateRunInput, RunCreation, RunMetadataRepository};
pub use user_store::{ApplyStatisticsInput, StatisticsApplyOutcome, UserStatisticsRepository};
