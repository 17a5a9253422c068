//! Error types for the database layer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

/// Database errors, classified so that callers can map them onto the
/// Malformed/Policy/Transient/Conflict taxonomy (spec.md §7) without
/// re-inspecting SQL error codes themselves.
#[derive(Error, Debug)]
pub enum DbError {
    /// Connection or query failure — generally Transient.
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    /// No row matched the lookup — generally Policy (e.g. missing header).
    #[error("not found: {0}")]
    NotFound(String),

    /// A unique/foreign-key constraint was violated, e.g. duplicate
    /// accession id — Policy.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The requested transition is not reachable from the file's current
    /// status — Conflict when it means another worker already advanced the
    /// row, Policy otherwise.
    #[error("invalid status transition: {0}")]
    InvalidState(String),

    /// Another worker already completed this exact operation — Conflict.
    /// The caller should ack and not republish.
    #[error("operation already applied by another worker: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// True if a redelivered message racing another worker should simply be
    /// acked rather than retried or dead-lettered.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DbError::Conflict(_))
    }
}
