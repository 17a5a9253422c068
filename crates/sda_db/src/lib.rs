//! Relational state store for the SDA ingestion pipeline.
//!
//! Wraps a Postgres connection pool with the `local_ega` schema and the
//! file lifecycle operations every worker drives (spec.md §3, §4).

pub mod error;
pub mod files;
pub mod pool;
pub mod schema;
pub mod types;

use std::time::Duration;

use sqlx::PgPool;

pub use error::{DbError, Result};
pub use pool::DbConfig;
pub use types::FileRow;

use sda_protocol::{ChecksumType, FileStatus};

/// Handle to the state store. Cheap to clone — `PgPool` is itself a
/// reference-counted handle to the connection set.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(config: DbConfig) -> Result<Self> {
        let pool = pool::create_pool(config).await?;
        schema::ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Wrap an already-constructed pool, e.g. one shared with a test harness.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Liveness probe bounded by `timeout`, used by the readiness endpoint.
    pub async fn ping(&self, timeout: Duration) -> bool {
        pool::ping(&self.pool, timeout).await
    }

    /// Orderly shutdown (spec.md §5): closes the pool after the broker
    /// connection has already been closed, waiting for in-flight queries to
    /// finish rather than severing them.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn insert_file(&self, submission_user: &str, inbox_path: &str) -> Result<i64> {
        files::insert_file(&self.pool, submission_user, inbox_path).await
    }

    pub async fn get_file(&self, file_id: i64) -> Result<FileRow> {
        files::get_file(&self.pool, file_id).await
    }

    pub async fn get_file_status(&self, file_id: i64) -> Result<FileStatus> {
        files::get_file_status(&self.pool, file_id).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn set_archived(
        &self,
        file_id: i64,
        archive_path: &str,
        header: &[u8],
        archive_file_size: i64,
        archive_checksum: &str,
        archive_checksum_type: ChecksumType,
    ) -> Result<()> {
        files::set_archived(
            &self.pool,
            file_id,
            archive_path,
            header,
            archive_file_size,
            archive_checksum,
            archive_checksum_type,
        )
        .await
    }

    pub async fn get_header(&self, file_id: i64) -> Result<Vec<u8>> {
        files::get_header(&self.pool, file_id).await
    }

    pub async fn mark_completed(
        &self,
        file_id: i64,
        decrypted_file_size: i64,
        decrypted_checksum: &str,
        decrypted_checksum_type: ChecksumType,
    ) -> Result<()> {
        files::mark_completed(
            &self.pool,
            file_id,
            decrypted_file_size,
            decrypted_checksum,
            decrypted_checksum_type,
        )
        .await
    }

    pub async fn set_accession_id(&self, file_id: i64, accession_id: &str) -> Result<()> {
        files::set_accession_id(&self.pool, file_id, accession_id).await
    }

    pub async fn map_dataset(&self, dataset_id: &str, accession_ids: &[String]) -> Result<()> {
        files::map_dataset(&self.pool, dataset_id, accession_ids).await
    }

    pub async fn mark_backuped(&self, file_id: i64) -> Result<()> {
        files::mark_backuped(&self.pool, file_id).await
    }

    pub async fn mark_error(&self, file_id: i64) -> Result<()> {
        files::mark_error(&self.pool, file_id).await
    }
}
