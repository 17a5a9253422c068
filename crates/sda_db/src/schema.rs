//! Schema bootstrap for the `local_ega` namespace.
//!
//! Single source of truth for every `CREATE TABLE` statement the pipeline
//! depends on.

use sqlx::PgPool;
use tracing::info;

use crate::error::Result;

pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query("CREATE SCHEMA IF NOT EXISTS local_ega")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS local_ega.files (
            id BIGSERIAL PRIMARY KEY,
            stable_id TEXT UNIQUE,
            submission_user TEXT NOT NULL,
            inbox_path TEXT NOT NULL,
            archive_path TEXT,
            status TEXT NOT NULL DEFAULT 'REGISTERED',
            header BYTEA,
            archive_file_size BIGINT,
            archive_file_checksum TEXT,
            archive_file_checksum_type TEXT,
            decrypted_file_size BIGINT,
            decrypted_file_checksum TEXT,
            decrypted_file_checksum_type TEXT,
            backuped BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
    )
    .execute(pool)
    .await?;

    // Archive paths are unique within the active set (spec.md §3); a purge
    // clears archive_path to NULL before the path can be reused, and NULLs
    // are exempt from a UNIQUE index in Postgres.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_files_archive_path ON local_ega.files(archive_path)",
    )
    .execute(pool)
    .await?;

    // Covers every status below ARCHIVED so a redelivered trigger message
    // stays idempotent for as long as the file hasn't reached the archive
    // (spec.md §4.3 — "while status is < archived").
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_files_inbox_user ON local_ega.files(inbox_path, submission_user) WHERE status IN ('REGISTERED', 'UPLOADED', 'SUBMITTED')",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_status ON local_ega.files(status)")
        .execute(pool)
        .await?;

    // Dataset mapping: (dataset_id, accession_id) pairs (spec.md §3).
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS local_ega.dataset_mapping (
            dataset_id TEXT NOT NULL,
            stable_id TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE(dataset_id, stable_id)
        )"#,
    )
    .execute(pool)
    .await?;

    info!("database schema verified");
    Ok(())
}
