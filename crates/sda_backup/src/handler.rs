//! Consume loop for the backup worker (spec.md §4.5): copies the archive
//! object to a redundant backend and re-verifies the copy by reading it
//! back and re-hashing, rather than trusting the write path alone.

use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;

use sda_broker::{Broker, Delivery, PublishArgs};
use sda_db::{Db, DbError};
use sda_protocol::{defaults, CompletionMessage, SchemaRegistry};
use sda_security::Sha256TeeReader;
use sda_storage::{ObjectStore, StorageError};

pub struct Context {
    pub db: Db,
    pub broker: Broker,
    pub archive: Arc<dyn ObjectStore>,
    pub backup: Arc<dyn ObjectStore>,
    pub schemas: Arc<SchemaRegistry>,
    pub durable: bool,
    pub shutdown: Arc<Notify>,
}

#[derive(Error, Debug)]
enum BackupError {
    #[error("policy violation: {0}")]
    Policy(String),
    #[error("transient: {0}")]
    Transient(String),
}

impl BackupError {
    fn is_transient(&self) -> bool {
        matches!(self, BackupError::Transient(_))
    }
}

impl From<DbError> for BackupError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sql(_) => BackupError::Transient(err.to_string()),
            DbError::NotFound(_)
            | DbError::Constraint(_)
            | DbError::InvalidState(_)
            | DbError::Conflict(_) => BackupError::Policy(err.to_string()),
            DbError::Serialization(_) => BackupError::Policy(err.to_string()),
        }
    }
}

impl From<StorageError> for BackupError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => BackupError::Policy(err.to_string()),
            StorageError::Io { .. } | StorageError::S3(_) => BackupError::Transient(err.to_string()),
        }
    }
}

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        BackupError::Transient(err.to_string())
    }
}

/// Drive the backup consume loop until the broker stream ends or the
/// connection is lost.
pub async fn run(ctx: Context) -> anyhow::Result<()> {
    let ctx = Arc::new(ctx);
    let deliveries = ctx.broker.consume(defaults::QUEUE_COMPLETED, "sda-backup").await?;
    tokio::pin!(deliveries);

    loop {
        tokio::select! {
            _ = ctx.broker.watch_connection() => {
                anyhow::bail!("broker connection lost");
            }
            _ = ctx.shutdown.notified() => {
                tracing::info!("shutting down: closing broker then database, in-flight deliveries left unacked");
                ctx.broker.close().await?;
                ctx.db.close().await;
                return Ok(());
            }
            next = deliveries.next() => {
                match next {
                    Some(delivery) => {
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_delivery(&ctx, delivery).await {
                                tracing::error!(%err, "failed to process backup delivery");
                            }
                        });
                    }
                    None => return Ok(()),
                }
            }
        }
    }
}

async fn handle_delivery(ctx: &Context, delivery: Delivery) -> anyhow::Result<()> {
    let body = delivery.data().to_vec();

    if let Err(err) = ctx.schemas.validate("ingestion-completion.json", &body) {
        tracing::warn!(%err, "completion message failed schema validation");
        return dead_letter(ctx, delivery, &body).await;
    }

    let msg: CompletionMessage = match serde_json::from_slice(&body) {
        Ok(msg) => msg,
        Err(err) => {
            tracing::warn!(%err, "completion message is not valid JSON");
            return dead_letter(ctx, delivery, &body).await;
        }
    };

    match backup_file(ctx, &msg).await {
        Ok(()) => {
            delivery.ack().await?;
            Ok(())
        }
        Err(err) if err.is_transient() => {
            tracing::warn!(%err, file_id = msg.file_id, "leaving backup delivery unacked for redelivery");
            Ok(())
        }
        Err(err) => {
            if let Err(mark_err) = ctx.db.mark_error(msg.file_id).await {
                tracing::warn!(%mark_err, file_id = msg.file_id, "failed to mark file as errored");
            }
            tracing::warn!(%err, file_id = msg.file_id, "dead-lettering completion message");
            dead_letter(ctx, delivery, &body).await
        }
    }
}

async fn backup_file(ctx: &Context, msg: &CompletionMessage) -> Result<(), BackupError> {
    let file = ctx.db.get_file(msg.file_id).await?;
    let expected_checksum = file.archive_file_checksum.ok_or_else(|| {
        BackupError::Policy(format!(
            "file {} has no recorded archive checksum to re-verify against",
            msg.file_id
        ))
    })?;

    let mut reader = ctx.archive.reader(&msg.archive_path).await?;
    let mut writer = ctx.backup.writer(&msg.archive_path).await?;
    tokio::io::copy(&mut reader, &mut writer).await?;
    writer.shutdown().await?;

    let readback = ctx.backup.reader(&msg.archive_path).await?;
    let mut tee = Sha256TeeReader::new(readback);
    tokio::io::copy(&mut tee, &mut tokio::io::sink()).await?;
    let (checksum, _) = tee.finish();

    if checksum.value != expected_checksum {
        return Err(BackupError::Policy(format!(
            "backup copy of file {} does not match archive checksum: archive {}, backup {}",
            msg.file_id, expected_checksum, checksum.value
        )));
    }

    ctx.db.mark_backuped(msg.file_id).await?;
    Ok(())
}

async fn dead_letter(ctx: &Context, delivery: Delivery, body: &[u8]) -> anyhow::Result<()> {
    let correlation_id = delivery.correlation_id().unwrap_or("unknown").to_string();
    ctx.broker
        .publish(PublishArgs {
            exchange: "",
            routing_key: defaults::ROUTING_KEY_ERROR,
            correlation_id: &correlation_id,
            body,
            durable: ctx.durable,
        })
        .await?;
    delivery.nack(false).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_not_found_is_policy() {
        let err: BackupError = StorageError::NotFound("x".to_string()).into();
        assert!(!err.is_transient());
    }

    #[test]
    fn storage_io_is_transient() {
        let err: BackupError = StorageError::io("x", std::io::Error::other("disk full")).into();
        assert!(err.is_transient());
    }

    #[test]
    fn missing_archive_checksum_is_policy() {
        let err: BackupError = DbError::not_found("no checksum").into();
        assert!(!err.is_transient());
    }
}
