//! Error types for collection, storage and synchronization.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while talking to the hosting API.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("GitHub API error: {context}")]
    RemoteApi {
        context: String,
        #[source]
        source: Option<octocrab::Error>,
    },

    #[error("{listing} listing exceeded the safety limit of {limit} pages")]
    SafetyLimitExceeded { listing: String, limit: u32 },
}

impl CollectError {
    /// Build a remote API error that has no underlying client error.
    pub fn remote(context: impl Into<String>) -> Self {
        CollectError::RemoteApi {
            context: context.into(),
            source: None,
        }
    }

    /// Wrap a client error with a description of the failed request.
    pub fn api(context: impl Into<String>, source: octocrab::Error) -> Self {
        CollectError::RemoteApi {
            context: context.into(),
            source: Some(source),
        }
    }
}

/// Errors raised by metric storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode or decode stored document: {0}")]
    Format(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("invalid key filter: {0}")]
    InvalidFilter(#[from] regex::Error),

    #[error("storage connection lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Fatal error for a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
