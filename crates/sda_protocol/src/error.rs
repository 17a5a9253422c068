//! Error types for message envelopes and schema validation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while building, (de)serializing or validating messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message does not conform to schema '{schema}': {detail}")]
    SchemaViolation { schema: String, detail: String },

    #[error("failed to load schema '{schema}' from {path}: {source}")]
    SchemaLoad {
        schema: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("schema '{schema}' is not valid JSON Schema: {detail}")]
    SchemaInvalid { schema: String, detail: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown checksum type: {0}")]
    UnknownChecksumType(String),

    #[error("unknown file status: {0}")]
    UnknownFileStatus(String),
}
