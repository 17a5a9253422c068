//! Row types returned by the database layer.

use chrono::{DateTime, Utc};
use sda_protocol::FileStatus;

/// A single row of the `local_ega.files` table (spec.md §6).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileRow {
    pub id: i64,
    pub stable_id: Option<String>,
    pub submission_user: String,
    pub inbox_path: String,
    pub archive_path: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: StatusColumn,
    pub header: Option<Vec<u8>>,
    pub archive_file_size: Option<i64>,
    pub archive_file_checksum: Option<String>,
    pub archive_file_checksum_type: Option<String>,
    pub decrypted_file_size: Option<i64>,
    pub decrypted_file_checksum: Option<String>,
    pub decrypted_file_checksum_type: Option<String>,
    pub backuped: bool,
    pub created_at: DateTime<Utc>,
}

/// Newtype so `sqlx::FromRow`'s `try_from` can bridge the `TEXT` column to
/// [`FileStatus`] without requiring `sqlx`'s `Type` derive on a foreign enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusColumn(pub FileStatus);

impl TryFrom<String> for StatusColumn {
    type Error = sda_protocol::ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse().map(StatusColumn)
    }
}

impl From<StatusColumn> for FileStatus {
    fn from(value: StatusColumn) -> Self {
        value.0
    }
}

impl FileRow {
    pub fn status(&self) -> FileStatus {
        self.status.0
    }
}
