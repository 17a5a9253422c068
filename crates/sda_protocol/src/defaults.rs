//! Canonical default values shared across the ingestion pipeline.

/// Default directory holding the versioned JSON Schema files.
pub const DEFAULT_SCHEMA_DIR: &str = "schemas";

/// Queue/routing-key names. These are configuration in a real deployment
/// (see [`crate::config::BrokerConfig`]); the constants here are the
/// conventional defaults used when no override is supplied.
pub const QUEUE_INGEST: &str = "ingest";
pub const QUEUE_ARCHIVED: &str = "archived";
/// Verify publishes here once a file's plaintext checksums are known; an
/// external accessioning authority (out of scope, spec.md §1) is expected
/// to consume it and assign the stable accession id.
pub const QUEUE_ACCESSION_REQUEST: &str = "accession-request";
/// Finalize consumes here: the accessioning authority's reply, carrying the
/// assigned accession id.
pub const QUEUE_ACCESSION: &str = "accession";
pub const QUEUE_COMPLETED: &str = "completed";
pub const QUEUE_MAPPINGS: &str = "mappings";
pub const QUEUE_BACKUP: &str = "backup";
pub const ROUTING_KEY_ERROR: &str = "error";

pub const DEFAULT_BROKER_URI: &str = "amqp://127.0.0.1:5672/%2f";
pub const DEFAULT_DB_URL: &str = "postgres://localhost/sda";
pub const DEFAULT_READY_ADDR: &str = "0.0.0.0:8080";

/// Readiness probes must resolve within this window (spec.md §6).
pub const READINESS_PROBE_TIMEOUT_MS: u64 = 5;
