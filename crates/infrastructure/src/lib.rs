//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod fs_object_store;
mod in_memory_audit_repository;
mod in_memory_object_store;
mod in_memory_run_metadata_repository;
mod in_memory_user_statistics_repository;
mod postgres_user_statistics_repository;
mod record_sanitizer;
mod redis_audit_repository;
mod redis_run_metadata_repository;

pub use fs_object_store::FsObjectStore;
pub use in_memory_audit_repository::InMemoryAuditRepository;
pub use in_memory_object_store::InMemoryObjectStore;
pub use in_memory_run_metadata_repository::InMemoryRunMetadataRepository;
pub use in_memory_user_statistics_repository::InMemoryUserStatisticsRepository;
pub use postgres_user_statistics_repository::PostgresUserStatisticsRepository;
pub use record_sanitizer::{SANITIZE_MAX_DEPTH, iso8601, sanitize_value};
pub use redis_audit_repository::RedisAuditRepository;
pub use redis_run_metadata_repository::RedisRunMetadataRepository;
