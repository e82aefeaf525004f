//! In-memory adapter for the object-store port, for tests and local runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use statsink_application::{ObjectPayload, ObjectStore, PutObjectInput};
use statsink_core::{AppError, AppResult};

/// In-memory object store keyed by `(bucket, key)`.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<(String, String), PutObjectInput>>,
}

impl InMemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds one object with raw bytes.
    pub async fn seed(&self, bucket: &str, key: &str, bytes: impl Into<Vec<u8>>) {
        let bytes = bytes.into();
        self.objects.lock().await.insert(
            (bucket.to_owned(), key.to_owned()),
            PutObjectInput {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                bytes,
                content_type: "text/csv".to_owned(),
                content_encoding: None,
                content_md5: None,
                server_side_encryption: None,
                metadata: Default::default(),
            },
        );
    }

    /// Returns one stored object write, headers included.
    pub async fn stored(&self, bucket: &str, key: &str) -> Option<PutObjectInput> {
        self.objects
            .lock()
            .await
            .get(&(bucket.to_owned(), key.to_owned()))
            .cloned()
    }

    /// Lists stored keys for one bucket.
    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .await
            .keys()
            .filter(|(stored_bucket, _)| stored_bucket == bucket)
            .map(|(_, key)| key.clone())
            .collect()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> AppResult<ObjectPayload> {
        let objects = self.objects.lock().await;
        let stored = objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .ok_or_else(|| AppError::NotFound(format!("object '{bucket}/{key}'")))?;

        Ok(ObjectPayload {
            bytes: stored.bytes.clone(),
            size: stored.bytes.len() as u64,
            etag: None,
        })
    }

    async fn put_object(&self, input: PutObjectInput) -> AppResult<()> {
        self.objects
            .lock()
            .await
            .insert((input.bucket.clone(), input.key.clone()), input);
        Ok(())
    }
}
