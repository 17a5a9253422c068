//! Object storage backends for the SDA ingestion pipeline (spec.md §4.2).

pub mod error;
pub mod posix;
pub mod s3;

pub use error::{Result, StorageError};
pub use posix::PosixBackend;
pub use s3::{S3Backend, S3Config};

use tokio::io::{AsyncRead, AsyncWrite};

/// Storage backend contract. Both the encrypted archive and its plaintext
/// form are addressed by a backend-relative path string.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_file_size(&self, path: &str) -> Result<u64>;

    async fn reader(&self, path: &str) -> Result<Box<dyn AsyncRead + Unpin + Send>>;

    /// Returns a writer that only makes the object visible under `path`
    /// once it has been cleanly shut down (spec.md §4.2 — atomic writes).
    async fn writer(&self, path: &str) -> Result<Box<dyn AsyncWrite + Unpin + Send>>;
}

/// Construct the backend named by a worker's `StorageConfig` section, so
/// each binary's `main.rs` stays thin wiring rather than repeating backend
/// selection (spec.md §4.5: "each a thin binary wiring ... together").
pub async fn build_backend(config: &sda_protocol::config::StorageConfig) -> Result<Box<dyn ObjectStore>> {
    match config {
        sda_protocol::config::StorageConfig::Posix { root } => Ok(Box::new(PosixBackend::new(root))),
        sda_protocol::config::StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            access_key_id,
            secret_access_key,
            path_style,
            ca_bundle,
        } => Ok(Box::new(
            S3Backend::new(S3Config {
                bucket: bucket.clone(),
                region: region.clone().unwrap_or_else(|| "us-east-1".to_string()),
                endpoint: endpoint.clone(),
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
                path_style: *path_style,
                ca_bundle: ca_bundle.clone(),
            })
            .await?,
        )),
    }
}
