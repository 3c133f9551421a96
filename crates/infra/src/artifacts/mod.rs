//! Durable storage for generated offer documents.
//!
//! Stores are append-only: every successful generation attempt writes a new
//! path, and `put` refuses to replace bytes that already exist.

mod fs;
mod in_memory;

pub use fs::FsArtifactStore;
pub use in_memory::InMemoryArtifactStore;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use projectdesk_offers::{OfferId, ProjectId};

/// Relative location of an artifact inside a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactPath(String);

impl ArtifactPath {
    /// `offers/offer-{project}-{offer}-{unix millis}.pdf`
    pub fn for_offer(project_id: ProjectId, offer_id: OfferId, at: DateTime<Utc>) -> Self {
        Self(format!(
            "offers/offer-{project_id}-{offer_id}-{}.pdf",
            at.timestamp_millis()
        ))
    }

    /// Validate a stored path. Rejects empty, absolute and parent-relative paths.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ArtifactError> {
        let raw = raw.into();
        let invalid = raw.is_empty()
            || raw.starts_with('/')
            || raw.contains('\\')
            || raw
                .split('/')
                .any(|segment| segment.is_empty() || segment == "." || segment == "..");
        if invalid {
            return Err(ArtifactError::InvalidPath(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final path segment.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for ArtifactPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ArtifactPath {
    type Error = ArtifactError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ArtifactPath> for String {
    fn from(value: ArtifactPath) -> Self {
        value.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("artifact already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid artifact path: {0:?}")]
    InvalidPath(String),
    #[error("artifact io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("artifact storage error: {0}")]
    Storage(String),
}

/// Append-only artifact storage.
pub trait ArtifactStore: Send + Sync {
    /// Durably write `bytes` at `path`. Fails with `AlreadyExists` rather than overwrite.
    fn put(&self, path: &ArtifactPath, bytes: &[u8]) -> Result<(), ArtifactError>;

    fn get(&self, path: &ArtifactPath) -> Result<Vec<u8>, ArtifactError>;

    fn exists(&self, path: &ArtifactPath) -> Result<bool, ArtifactError>;

    /// Remove an artifact that was never referenced by an offer record.
    fn discard(&self, path: &ArtifactPath) -> Result<(), ArtifactError>;
}

impl<S: ArtifactStore + ?Sized> ArtifactStore for Arc<S> {
    fn put(&self, path: &ArtifactPath, bytes: &[u8]) -> Result<(), ArtifactError> {
        (**self).put(path, bytes)
    }

    fn get(&self, path: &ArtifactPath) -> Result<Vec<u8>, ArtifactError> {
        (**self).get(path)
    }

    fn exists(&self, path: &ArtifactPath) -> Result<bool, ArtifactError> {
        (**self).exists(path)
    }

    fn discard(&self, path: &ArtifactPath) -> Result<(), ArtifactError> {
        (**self).discard(path)
    }
}
