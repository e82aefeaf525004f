//! Shared primitives for all Rust crates in Statsink.

#![forbid(unsafe_code)]

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across Statsink crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

/// Maximum length of a run identifier.
pub const RUN_ID_MAX_LENGTH: usize = 80;

/// Run identifier used as the partition key for every persisted run resource.
///
/// Restricted to `[A-Za-z0-9_-]`, between 1 and 80 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Creates a validated run identifier.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();

        if value.is_empty() {
            return Err(AppError::Validation("run id must not be empty".to_owned()));
        }

        if value.len() > RUN_ID_MAX_LENGTH {
            return Err(AppError::Validation(format!(
                "run id must not exceed {RUN_ID_MAX_LENGTH} characters, got {}",
                value.len()
            )));
        }

        if let Some(invalid) = value
            .chars()
            .find(|ch| !ch.is_ascii_alphanumeric() && *ch != '_' && *ch != '-')
        {
            return Err(AppError::Validation(format!(
                "run id must only contain [A-Za-z0-9_-], found '{invalid}'"
            )));
        }

        Ok(Self(value))
    }

    /// Returns the underlying run id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<RunId> for String {
    fn from(value: RunId) -> Self {
        value.0
    }
}

impl Display for RunId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Common application error categories.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Missing or malformed deployment configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Operation exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Object storage access failure.
    #[error("object storage error: {0}")]
    Storage(String),

    /// Key-value store access failure.
    #[error("key-value store error: {0}")]
    KeyValue(String),

    /// Relational store access failure.
    #[error("database error: {0}")]
    Database(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns whether retrying the failed operation may succeed.
    ///
    /// Store access failures and timeouts are transient; validation,
    /// conflict, and configuration failures are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Storage(_) | Self::KeyValue(_) | Self::Database(_)
        )
    }
}
