//! Trigger-event parsing.
//!
//! Inbound events arrive as runtime-tagged JSON objects from several
//! sources. They are modeled as one tagged sum type; each variant carries
//! its own payload and only storage-shaped events can start a run.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reference to one object in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageObjectRef {
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Object size in bytes when the event carries it.
    pub size: Option<u64>,
    /// Entity tag when the event carries it.
    pub etag: Option<String>,
}

impl StorageObjectRef {
    /// Returns the `bucket/key` source reference.
    #[must_use]
    pub fn source_ref(&self) -> String {
        format!("{}/{}", self.bucket, self.key)
    }
}

/// One parsed inbound trigger event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParsedEvent {
    /// Object-created notification from storage.
    Storage {
        /// Referenced object.
        object: StorageObjectRef,
    },
    /// Re-dispatch from the workflow orchestrator.
    Orchestrator {
        /// Orchestrator execution id.
        execution_id: String,
        /// Referenced object.
        object: StorageObjectRef,
    },
    /// HTTP gateway invocation; never starts a run directly.
    ApiGateway {
        /// Request path.
        path: String,
        /// Request method.
        method: String,
        /// Request body when present.
        body: Option<Value>,
    },
    /// Unrecognized event shape, kept for diagnostics.
    Unknown {
        /// Raw payload.
        payload: Value,
    },
}

impl ParsedEvent {
    /// Classifies one raw event payload.
    #[must_use]
    pub fn parse(value: &Value) -> Self {
        if let Some(object) = storage_object_from(value) {
            if let Some(execution_id) = value
                .get("execution")
                .and_then(|execution| execution.get("id"))
                .and_then(Value::as_str)
            {
                return Self::Orchestrator {
                    execution_id: execution_id.to_owned(),
                    object,
                };
            }

            return Self::Storage { object };
        }

        if let (Some(path), Some(method)) = (
            value.get("path").and_then(Value::as_str),
            value.get("httpMethod").and_then(Value::as_str),
        ) {
            return Self::ApiGateway {
                path: path.to_owned(),
                method: method.to_owned(),
                body: value.get("body").cloned(),
            };
        }

        Self::Unknown {
            payload: value.clone(),
        }
    }

    /// Returns the referenced storage object for run-starting variants.
    #[must_use]
    pub fn storage_object(&self) -> Option<&StorageObjectRef> {
        match self {
            Self::Storage { object } | Self::Orchestrator { object, .. } => Some(object),
            Self::ApiGateway { .. } | Self::Unknown { .. } => None,
        }
    }
}

fn storage_object_from(value: &Value) -> Option<StorageObjectRef> {
    let container = value.get("s3").unwrap_or(value);
    let bucket = container.get("bucket").and_then(Value::as_str)?;
    let key = container.get("key").and_then(Value::as_str)?;

    Some(StorageObjectRef {
        bucket: bucket.to_owned(),
        key: key.to_owned(),
        size: container.get("size").and_then(Value::as_u64),
        etag: container
            .get("etag")
            .and_then(Value::as_str)
            .map(str::to_owned),
    })
}

/// Returns whether an object key and size are eligible for ingestion.
///
/// Only `.csv` keys within the size cap are dispatched; everything else
/// is ignored at the trigger boundary.
#[must_use]
pub fn is_ingestible_csv(key: &str, size: Option<u64>, max_size_bytes: u64) -> bool {
    let has_csv_suffix = key
        .rsplit('.')
        .next()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("csv"))
        && key.len() > 4;

    has_csv_suffix && size.is_none_or(|size| size <= max_size_bytes)
}
