//! Message envelopes, schema validation and shared configuration for the
//! SDA ingestion pipeline.
//!
//! Every worker depends on this crate for its wire types, its JSON Schema
//! registry, and its layered configuration struct, so that the envelope
//! shapes and queue/schema names stay a single source of truth across
//! ingest, verify, finalize, mapper and backup.

pub mod config;
pub mod defaults;
pub mod error;
pub mod schema;
pub mod types;

pub use error::{ProtocolError, Result};
pub use schema::SchemaRegistry;
pub use types::{
    AccessionMessage, AccessionRequestMessage, Checksum, ChecksumType, CompletionMessage,
    DatasetMappingMessage, FileStatus, IngestionTriggerMessage, Timestamp, VerificationMessage,
};

/// Generate a fresh correlation id for a new ingest flow.
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
