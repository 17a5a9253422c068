//! Errors returned by object storage backends.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage errors, classified per the Malformed/Policy/Transient/Conflict
/// taxonomy (spec.md §7) — almost everything here is Transient, since the
/// backends themselves don't validate file contents.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("io error accessing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("s3 error: {0}")]
    S3(String),
}

impl StorageError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
