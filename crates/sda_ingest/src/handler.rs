//! Consume loop and archival procedure for the ingest worker.

use std::sync::Arc;

use sda_broker::{Broker, Delivery, PublishArgs};
use sda_db::{Db, DbError};
use sda_protocol::{defaults, FileStatus, IngestionTriggerMessage, SchemaRegistry, VerificationMessage};
use sda_security::{Crypt4GhError, Crypt4GhHeaderReader, Sha256TeeReader};
use sda_storage::{ObjectStore, StorageError};
use futures::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;

pub struct Context {
    pub db: Db,
    pub broker: Broker,
    pub inbox: Arc<dyn ObjectStore>,
    pub archive: Arc<dyn ObjectStore>,
    pub header_reader: Arc<dyn Crypt4GhHeaderReader>,
    pub schemas: Arc<SchemaRegistry>,
    pub durable: bool,
    pub shutdown: Arc<Notify>,
}

/// Handler-boundary classification (shared shape across the worker binaries,
/// spec.md §7). Malformed and Policy both dead-letter; only their log
/// wording differs. Transient leaves the delivery unacked for redelivery.
#[derive(Error, Debug)]
enum IngestError {
    #[error("malformed: {0}")]
    Malformed(String),
    #[error("policy violation: {0}")]
    Policy(String),
    #[error("transient: {0}")]
    Transient(String),
}

impl IngestError {
    fn is_policy(&self) -> bool {
        matches!(self, IngestError::Policy(_))
    }
}

impl From<DbError> for IngestError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sql(_) => IngestError::Transient(err.to_string()),
            DbError::NotFound(_) | DbError::Constraint(_) | DbError::InvalidState(_) => {
                IngestError::Policy(err.to_string())
            }
            DbError::Conflict(_) => IngestError::Policy(err.to_string()),
            DbError::Serialization(_) => IngestError::Malformed(err.to_string()),
        }
    }
}

impl From<StorageError> for IngestError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => IngestError::Policy(err.to_string()),
            StorageError::Io { .. } | StorageError::S3(_) => IngestError::Transient(err.to_string()),
        }
    }
}

impl From<Crypt4GhError> for IngestError {
    fn from(err: Crypt4GhError) -> Self {
        match err {
            Crypt4GhError::HeaderInvalid(_) | Crypt4GhError::KeyMismatch => {
                IngestError::Policy(err.to_string())
            }
            Crypt4GhError::Io(_) => IngestError::Transient(err.to_string()),
        }
    }
}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        IngestError::Transient(err.to_string())
    }
}

enum Outcome {
    Archived(VerificationMessage),
    /// The trigger was redelivered after the file already progressed past
    /// `ARCHIVED` under a previous delivery; nothing left to do.
    AlreadyHandled,
}

/// Drive the ingest consume loop until the broker stream ends or the
/// connection is lost.
pub async fn run(ctx: Context) -> anyhow::Result<()> {
    let ctx = Arc::new(ctx);
    let deliveries = ctx.broker.consume(defaults::QUEUE_INGEST, "sda-ingest").await?;
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
                                tracing::error!(%err, "failed to process ingest delivery");
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

    if let Err(err) = ctx.schemas.validate("ingestion-trigger.json", &body) {
        tracing::warn!(%err, "ingest trigger message failed schema validation");
        return dead_letter(ctx, delivery, &body).await;
    }

    let msg: IngestionTriggerMessage = match serde_json::from_slice(&body) {
        Ok(msg) => msg,
        Err(err) => {
            tracing::warn!(%err, "ingest trigger message is not valid JSON");
            return dead_letter(ctx, delivery, &body).await;
        }
    };

    match archive_file(ctx, &msg).await {
        Ok(Outcome::AlreadyHandled) => {
            delivery.ack().await?;
            Ok(())
        }
        Ok(Outcome::Archived(verification)) => publish_and_ack(ctx, delivery, &msg, &verification).await,
        Err(err) if matches!(err, IngestError::Transient(_)) => {
            tracing::warn!(%err, filepath = %msg.filepath, "leaving ingest delivery unacked for redelivery");
            Ok(())
        }
        Err(err) => {
            tracing::warn!(%err, filepath = %msg.filepath, "dead-lettering ingest trigger");
            dead_letter(ctx, delivery, &body).await
        }
    }
}

async fn publish_and_ack(
    ctx: &Context,
    delivery: Delivery,
    msg: &IngestionTriggerMessage,
    verification: &VerificationMessage,
) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(verification)?;
    ctx.schemas
        .validate("ingestion-verification.json", &payload)?;

    let publish = ctx
        .broker
        .publish(PublishArgs {
            exchange: "",
            routing_key: defaults::QUEUE_ARCHIVED,
            correlation_id: &msg.correlation_id,
            body: &payload,
            durable: ctx.durable,
        })
        .await;

    match publish {
        Ok(()) => {
            delivery.ack().await?;
            Ok(())
        }
        Err(err) => {
            tracing::warn!(%err, filepath = %msg.filepath, "could not publish verification message, leaving ingest delivery unacked");
            Ok(())
        }
    }
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

/// Registers the file, then archives it if it hasn't already progressed
/// past `ARCHIVED` under a previous (redelivered) trigger.
async fn archive_file(ctx: &Context, msg: &IngestionTriggerMessage) -> Result<Outcome, IngestError> {
    let file_id = ctx.db.insert_file(&msg.user, &msg.filepath).await?;

    match continue_archiving(ctx, file_id, msg).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            if err.is_policy() {
                if let Err(mark_err) = ctx.db.mark_error(file_id).await {
                    tracing::warn!(%mark_err, file_id, "failed to mark file as errored");
                }
            }
            Err(err)
        }
    }
}

async fn continue_archiving(
    ctx: &Context,
    file_id: i64,
    msg: &IngestionTriggerMessage,
) -> Result<Outcome, IngestError> {
    let status = ctx.db.get_file_status(file_id).await?;
    if !matches!(
        status,
        FileStatus::Registered | FileStatus::Uploaded | FileStatus::Submitted
    ) {
        return Ok(Outcome::AlreadyHandled);
    }

    let inbox_reader = ctx.inbox.reader(&msg.filepath).await?;
    let (header, body) = ctx.header_reader.peel_header(inbox_reader).await?;

    let archive_path = format!("{file_id}/{}", uuid::Uuid::new_v4());
    let mut tee = Sha256TeeReader::new(body);
    let mut writer = ctx.archive.writer(&archive_path).await?;
    tokio::io::copy(&mut tee, &mut writer).await?;
    writer.shutdown().await?;
    let (checksum, encrypted_size) = tee.finish();

    match ctx
        .db
        .set_archived(
            file_id,
            &archive_path,
            &header,
            encrypted_size as i64,
            &checksum.value,
            checksum.checksum_type,
        )
        .await
    {
        Ok(()) => {}
        Err(DbError::InvalidState(_)) => return Ok(Outcome::AlreadyHandled),
        Err(err) => return Err(err.into()),
    }

    Ok(Outcome::Archived(VerificationMessage {
        file_id,
        archive_path,
        user: msg.user.clone(),
        filepath: msg.filepath.clone(),
        encrypted_checksums: vec![checksum],
        re_verify: false,
        correlation_id: msg.correlation_id.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_not_found_is_policy() {
        let err: IngestError = StorageError::NotFound("x".to_string()).into();
        assert!(err.is_policy());
    }

    #[test]
    fn storage_io_is_transient() {
        let err: IngestError = StorageError::io("x", std::io::Error::other("disk full")).into();
        assert!(matches!(err, IngestError::Transient(_)));
    }

    #[test]
    fn db_constraint_violation_is_policy() {
        let err: IngestError = DbError::constraint("duplicate archive path").into();
        assert!(err.is_policy());
    }

    #[test]
    fn crypt4gh_header_invalid_is_policy() {
        let err: IngestError = Crypt4GhError::HeaderInvalid("bad magic".to_string()).into();
        assert!(err.is_policy());
    }
}
