use std::collections::BTreeMap;

use async_trait::async_trait;
use statsink_core::AppResult;

/// One fetched object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPayload {
    /// Raw object bytes.
    pub bytes: Vec<u8>,
    /// Object size in bytes.
    pub size: u64,
    /// Storage entity tag when the backend provides one.
    pub etag: Option<String>,
}

/// Input for one object write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObjectInput {
    /// Target bucket.
    pub bucket: String,
    /// Target key.
    pub key: String,
    /// Object bytes.
    pub bytes: Vec<u8>,
    /// MIME content type.
    pub content_type: String,
    /// Content encoding header (`gzip` for compressed artifacts).
    pub content_encoding: Option<String>,
    /// Hex MD5 digest of the bytes.
    pub content_md5: Option<String>,
    /// Server-side encryption algorithm requested for the object.
    pub server_side_encryption: Option<String>,
    /// User metadata headers.
    pub metadata: BTreeMap<String, String>,
}

/// Port for the external object storage collaborator.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches one object.
    ///
    /// Returns `AppError::NotFound` for a missing key and
    /// `AppError::Storage` for access failures.
    async fn get_object(&self, bucket: &str, key: &str) -> AppResult<ObjectPayload>;

    /// Writes one object.
    async fn put_object(&self, input: PutObjectInput) -> AppResult<()>;
}
