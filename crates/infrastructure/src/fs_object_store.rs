//! Filesystem adapter for the object-store port.
//!
//! Object storage itself is an external collaborator; this adapter maps
//! `bucket/key` onto a rooted directory for local runs and development.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;

use statsink_application::{ObjectPayload, ObjectStore, PutObjectInput};
use statsink_core::{AppError, AppResult};

/// Filesystem-backed object store rooted at one directory.
#[derive(Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Creates a store rooted at `root`; buckets become subdirectories.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> AppResult<PathBuf> {
        validate_segment("bucket", bucket)?;

        if key.trim().is_empty() || key.split('/').any(|segment| segment == ".." || segment.is_empty())
        {
            return Err(AppError::Validation(format!(
                "object key '{key}' must be a clean relative path"
            )));
        }

        Ok(self.root.join(bucket).join(key))
    }
}

fn validate_segment(name: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() || value.contains('/') || value.contains("..") {
        return Err(AppError::Validation(format!(
            "{name} '{value}' must be a single clean path segment"
        )));
    }

    Ok(())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> AppResult<ObjectPayload> {
        let path = self.object_path(bucket, key)?;

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let size = bytes.len() as u64;
                Ok(ObjectPayload {
                    bytes,
                    size,
                    etag: None,
                })
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("object '{bucket}/{key}'")))
            }
            Err(error) => Err(AppError::Storage(format!(
                "failed to read object '{bucket}/{key}': {error}"
            ))),
        }
    }

    async fn put_object(&self, input: PutObjectInput) -> AppResult<()> {
        let path = self.object_path(input.bucket.as_str(), input.key.as_str())?;
        let parent = path.parent().map(Path::to_path_buf).ok_or_else(|| {
            AppError::Storage(format!("object key '{}' has no parent", input.key))
        })?;

        tokio::fs::create_dir_all(&parent).await.map_err(|error| {
            AppError::Storage(format!("failed to create '{}': {error}", parent.display()))
        })?;

        // Write-then-rename keeps concurrent readers off half-written
        // artifacts.
        let staging = path.with_extension("tmp");
        tokio::fs::write(&staging, &input.bytes)
            .await
            .map_err(|error| {
                AppError::Storage(format!(
                    "failed to write object '{}/{}': {error}",
                    input.bucket, input.key
                ))
            })?;
        tokio::fs::rename(&staging, &path).await.map_err(|error| {
            AppError::Storage(format!(
                "failed to finalize object '{}/{}': {error}",
                input.bucket, input.key
            ))
        })?;

        let sidecar = json!({
            "content_type": input.content_type,
            "content_encoding": input.content_encoding,
            "content_md5": input.content_md5,
            "server_side_encryption": input.server_side_encryption,
            "metadata": input.metadata,
        });
        let sidecar_path = PathBuf::from(format!("{}.meta.json", path.display()));
        tokio::fs::write(&sidecar_path, sidecar.to_string())
            .await
            .map_err(|error| {
                AppError::Storage(format!(
                    "failed to write object metadata '{}/{}': {error}",
                    input.bucket, input.key
                ))
            })?;

        Ok(())
    }
}
