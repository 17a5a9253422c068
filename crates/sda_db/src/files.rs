//! State-machine operations on `local_ega.files` (spec.md §4.3).

use sqlx::{PgPool, Row};

use sda_protocol::{ChecksumType, FileStatus};

use crate::error::{DbError, Result};
use crate::types::FileRow;

/// Register an inbox file, or return the id of the row already tracking it.
///
/// Idempotent on `(inbox_path, submission_user)` for as long as the existing
/// row hasn't progressed past `SUBMITTED` — a redelivered trigger message
/// must not spawn a second archival attempt.
pub async fn insert_file(pool: &PgPool, submission_user: &str, inbox_path: &str) -> Result<i64> {
    let mut tx = pool.begin().await?;

    let existing = sqlx::query(
        "SELECT id FROM local_ega.files \
         WHERE inbox_path = $1 AND submission_user = $2 \
         AND status IN ('REGISTERED', 'UPLOADED', 'SUBMITTED') \
         FOR UPDATE",
    )
    .bind(inbox_path)
    .bind(submission_user)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(row) = existing {
        tx.commit().await?;
        return Ok(row.get::<i64, _>("id"));
    }

    let row = sqlx::query(
        "INSERT INTO local_ega.files (submission_user, inbox_path, status) \
         VALUES ($1, $2, 'REGISTERED') RETURNING id",
    )
    .bind(submission_user)
    .bind(inbox_path)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row.get::<i64, _>("id"))
}

/// Fetch a file row by id.
pub async fn get_file(pool: &PgPool, file_id: i64) -> Result<FileRow> {
    sqlx::query_as::<_, FileRow>("SELECT * FROM local_ega.files WHERE id = $1")
        .bind(file_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::not_found(format!("no file with id {file_id}")))
}

/// Current lifecycle status of a file, without pulling the rest of the row.
pub async fn get_file_status(pool: &PgPool, file_id: i64) -> Result<FileStatus> {
    let row = sqlx::query("SELECT status FROM local_ega.files WHERE id = $1")
        .bind(file_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::not_found(format!("no file with id {file_id}")))?;

    row.get::<String, _>("status")
        .parse()
        .map_err(|e: sda_protocol::ProtocolError| DbError::Sql(sqlx::Error::Decode(Box::new(e))))
}

/// Record the archived copy: header, encrypted size and checksum, and the
/// transition to `ARCHIVED`.
#[allow(clippy::too_many_arguments)]
pub async fn set_archived(
    pool: &PgPool,
    file_id: i64,
    archive_path: &str,
    header: &[u8],
    archive_file_size: i64,
    archive_checksum: &str,
    archive_checksum_type: ChecksumType,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE local_ega.files SET \
            archive_path = $2, header = $3, archive_file_size = $4, \
            archive_file_checksum = $5, archive_file_checksum_type = $6, \
            status = 'ARCHIVED' \
         WHERE id = $1 AND status IN ('REGISTERED', 'UPLOADED', 'SUBMITTED')",
    )
    .bind(file_id)
    .bind(archive_path)
    .bind(header)
    .bind(archive_file_size)
    .bind(archive_checksum)
    .bind(archive_checksum_type.to_string())
    .execute(pool)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            DbError::constraint(format!("archive path {archive_path} already in use"))
        }
        _ => DbError::Sql(e),
    })?;

    if result.rows_affected() == 0 {
        return Err(DbError::invalid_state(format!(
            "file {file_id} is not in a state that can be archived"
        )));
    }
    Ok(())
}

/// Fetch the Crypt4GH header recorded at archival time.
pub async fn get_header(pool: &PgPool, file_id: i64) -> Result<Vec<u8>> {
    let row = sqlx::query("SELECT header FROM local_ega.files WHERE id = $1")
        .bind(file_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::not_found(format!("no file with id {file_id}")))?;

    row.get::<Option<Vec<u8>>, _>("header")
        .ok_or_else(|| DbError::not_found(format!("file {file_id} has no recorded header")))
}

/// Record the verified decrypted size and checksums, and transition to
/// `COMPLETED`. Fails with [`DbError::Conflict`] if another worker already
/// completed (or progressed past) this file — the caller should ack without
/// republishing.
pub async fn mark_completed(
    pool: &PgPool,
    file_id: i64,
    decrypted_file_size: i64,
    decrypted_checksum: &str,
    decrypted_checksum_type: ChecksumType,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query("SELECT status FROM local_ega.files WHERE id = $1 FOR UPDATE")
        .bind(file_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::not_found(format!("no file with id {file_id}")))?;

    let status: FileStatus = row
        .get::<String, _>("status")
        .parse()
        .map_err(|e: sda_protocol::ProtocolError| DbError::Sql(sqlx::Error::Decode(Box::new(e))))?;

    if matches!(status, FileStatus::Completed | FileStatus::Ready) {
        tx.rollback().await?;
        return Err(DbError::conflict(format!(
            "file {file_id} was already marked completed"
        )));
    }
    if status != FileStatus::Archived {
        tx.rollback().await?;
        return Err(DbError::invalid_state(format!(
            "file {file_id} must be archived before it can be completed, is {status}"
        )));
    }

    sqlx::query(
        "UPDATE local_ega.files SET \
            decrypted_file_size = $2, decrypted_file_checksum = $3, \
            decrypted_file_checksum_type = $4, status = 'COMPLETED' \
         WHERE id = $1",
    )
    .bind(file_id)
    .bind(decrypted_file_size)
    .bind(decrypted_checksum)
    .bind(decrypted_checksum_type.to_string())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Assign the stable accession id and transition to `READY`. Idempotent when
/// called again with the same `accession_id`; conflicts if a different one
/// is already assigned, or if the accession id is already claimed elsewhere.
pub async fn set_accession_id(pool: &PgPool, file_id: i64, accession_id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query("SELECT status, stable_id FROM local_ega.files WHERE id = $1 FOR UPDATE")
        .bind(file_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::not_found(format!("no file with id {file_id}")))?;

    let status: FileStatus = row
        .get::<String, _>("status")
        .parse()
        .map_err(|e: sda_protocol::ProtocolError| DbError::Sql(sqlx::Error::Decode(Box::new(e))))?;
    let stable_id: Option<String> = row.get("stable_id");

    if let Some(existing) = &stable_id {
        tx.rollback().await?;
        return if existing == accession_id {
            Ok(())
        } else {
            Err(DbError::constraint(format!(
                "file {file_id} already carries accession id {existing}, refusing to overwrite with {accession_id}"
            )))
        };
    }
    if status != FileStatus::Completed {
        tx.rollback().await?;
        return Err(DbError::invalid_state(format!(
            "file {file_id} must be completed before an accession id can be assigned, is {status}"
        )));
    }

    sqlx::query(
        "UPDATE local_ega.files SET stable_id = $2, status = 'READY' WHERE id = $1",
    )
    .bind(file_id)
    .bind(accession_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            DbError::constraint(format!("accession id {accession_id} already assigned to another file"))
        }
        _ => DbError::Sql(e),
    })?;

    tx.commit().await?;
    Ok(())
}

/// Add `(dataset_id, accession_id)` pairs to the dataset mapping table.
/// Upserts: re-announcing an already-mapped pair is a no-op.
pub async fn map_dataset(pool: &PgPool, dataset_id: &str, accession_ids: &[String]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for accession_id in accession_ids {
        sqlx::query(
            "INSERT INTO local_ega.dataset_mapping (dataset_id, stable_id) \
             VALUES ($1, $2) ON CONFLICT (dataset_id, stable_id) DO NOTHING",
        )
        .bind(dataset_id)
        .bind(accession_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Flip the orthogonal `backuped` flag. Does not touch `status`.
pub async fn mark_backuped(pool: &PgPool, file_id: i64) -> Result<()> {
    let result = sqlx::query("UPDATE local_ega.files SET backuped = TRUE WHERE id = $1")
        .bind(file_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found(format!("no file with id {file_id}")));
    }
    Ok(())
}

/// Move a file to the `ERROR` sink state, reachable from any status
/// (spec.md §3). Used on checksum mismatch and other permanent failures.
pub async fn mark_error(pool: &PgPool, file_id: i64) -> Result<()> {
    let result = sqlx::query("UPDATE local_ega.files SET status = 'ERROR' WHERE id = $1")
        .bind(file_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found(format!("no file with id {file_id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_progress_allows_error_from_anywhere() {
        assert!(FileStatus::Error.is_forward_from(FileStatus::Registered));
        assert!(FileStatus::Error.is_forward_from(FileStatus::Ready));
    }

    #[test]
    fn completed_is_not_forward_from_ready() {
        assert!(!FileStatus::Completed.is_forward_from(FileStatus::Ready));
    }

    /// `Error` is declared after `Ready` in `FileStatus` so it sorts above
    /// `Completed` under the derived `Ord` — `mark_completed`'s terminal
    /// check must not rely on that ordering, or a file re-verified
    /// successfully after a prior `ERROR` would be misclassified as already
    /// completed.
    #[test]
    fn completed_terminal_check_is_not_derived_ord() {
        assert!(!matches!(
            FileStatus::Error,
            FileStatus::Completed | FileStatus::Ready
        ));
        assert!(FileStatus::Error > FileStatus::Completed);
    }
}
