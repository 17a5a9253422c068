//! Consume loop and streaming verification procedure (spec.md §4.4).
//!
//! The hard part: a single pass over the archive object re-checks the
//! encrypted checksum, decrypts, and hashes the plaintext, so that the two
//! digests provably come from the same read (no TOCTOU gap between "what we
//! stored" and "what we attest to").

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;

use sda_broker::{Broker, Delivery, PublishArgs};
use sda_db::{Db, DbError};
use sda_protocol::{
    defaults, AccessionRequestMessage, Checksum, ChecksumType, SchemaRegistry, VerificationMessage,
};
use sda_security::{Crypt4GhDecryptor, Crypt4GhError, DualHashReader, SharedSha256Reader};
use sda_storage::{ObjectStore, StorageError};
use tokio::sync::Notify;

pub struct Context {
    pub db: Db,
    pub broker: Broker,
    pub archive: Arc<dyn ObjectStore>,
    pub decryptor: Arc<dyn Crypt4GhDecryptor>,
    pub private_key: Vec<u8>,
    pub schemas: Arc<SchemaRegistry>,
    pub durable: bool,
    pub shutdown: Arc<Notify>,
}

/// Handler-boundary classification (spec.md §7). Verify is the one worker
/// where all four kinds are load-bearing: `Conflict` is what keeps a
/// crash-then-redeliver race (S4) from double-publishing an accession
/// request.
#[derive(Error, Debug)]
enum VerifyError {
    #[error("malformed: {0}")]
    Malformed(String),
    #[error("policy violation: {0}")]
    Policy(String),
    #[error("transient: {0}")]
    Transient(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl VerifyError {
    fn is_transient(&self) -> bool {
        matches!(self, VerifyError::Transient(_))
    }
    fn is_conflict(&self) -> bool {
        matches!(self, VerifyError::Conflict(_))
    }
    fn wants_error_status(&self) -> bool {
        matches!(self, VerifyError::Policy(_))
    }
}

impl From<DbError> for VerifyError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sql(_) => VerifyError::Transient(err.to_string()),
            DbError::Conflict(_) => VerifyError::Conflict(err.to_string()),
            DbError::NotFound(_) | DbError::Constraint(_) | DbError::InvalidState(_) => {
                VerifyError::Policy(err.to_string())
            }
            DbError::Serialization(_) => VerifyError::Malformed(err.to_string()),
        }
    }
}

impl From<StorageError> for VerifyError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => VerifyError::Policy(err.to_string()),
            StorageError::Io { .. } | StorageError::S3(_) => VerifyError::Transient(err.to_string()),
        }
    }
}

impl From<Crypt4GhError> for VerifyError {
    fn from(err: Crypt4GhError) -> Self {
        match err {
            Crypt4GhError::HeaderInvalid(_) | Crypt4GhError::KeyMismatch => {
                VerifyError::Policy(err.to_string())
            }
            Crypt4GhError::Io(_) => VerifyError::Transient(err.to_string()),
        }
    }
}

impl From<std::io::Error> for VerifyError {
    fn from(err: std::io::Error) -> Self {
        VerifyError::Transient(err.to_string())
    }
}

enum Outcome {
    /// A fresh `COMPLETED` row; the accession-request message still needs
    /// to be published.
    Completed(AccessionRequestMessage),
    /// `re_verify: true` and the recomputed digests matched; nothing to
    /// commit or publish (spec.md §4.4 step 8).
    ReVerifySilent,
}

/// Drive the verify consume loop until the broker stream ends or the
/// connection is lost.
pub async fn run(ctx: Context) -> anyhow::Result<()> {
    let ctx = Arc::new(ctx);
    let deliveries = ctx.broker.consume(defaults::QUEUE_ARCHIVED, "sda-verify").await?;
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
                                tracing::error!(%err, "failed to process verify delivery");
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

    if let Err(err) = ctx.schemas.validate("ingestion-verification.json", &body) {
        tracing::warn!(%err, "verification message failed schema validation");
        return dead_letter(ctx, delivery, &body).await;
    }

    let msg: VerificationMessage = match serde_json::from_slice(&body) {
        Ok(msg) => msg,
        Err(err) => {
            tracing::warn!(%err, "verification message is not valid JSON");
            return dead_letter(ctx, delivery, &body).await;
        }
    };

    match verify_file(ctx, &msg).await {
        Ok(Outcome::ReVerifySilent) => {
            delivery.ack().await?;
            Ok(())
        }
        Ok(Outcome::Completed(accession_request)) => {
            publish_accession_then_ack(ctx, delivery, &msg, accession_request).await
        }
        Err(err) if err.is_conflict() => {
            tracing::info!(
                file_id = msg.file_id,
                "file already completed by another worker, acking without republishing"
            );
            delivery.ack().await?;
            Ok(())
        }
        Err(err) if err.is_transient() => {
            tracing::warn!(%err, file_id = msg.file_id, "leaving verify delivery unacked for redelivery");
            Ok(())
        }
        Err(err) => {
            if err.wants_error_status() {
                if let Err(mark_err) = ctx.db.mark_error(msg.file_id).await {
                    tracing::warn!(%mark_err, file_id = msg.file_id, "failed to mark file as errored");
                }
            }
            tracing::warn!(%err, file_id = msg.file_id, "dead-lettering verification message");
            dead_letter(ctx, delivery, &body).await
        }
    }
}

/// Publishes the accession-request message with bounded retry, then acks.
/// spec.md §9's open question ("we need to fix this resend stuff"): the
/// ordering DB-commit → publish → ack is strict, so a publish failure here
/// must not silently strand a `COMPLETED` row with no downstream message. A
/// crash-then-redeliver of *this* message is handled separately by the
/// `Conflict` path above, which intentionally does not republish (spec.md §8
/// invariant 4) — these retries are what make that path safe to rely on.
async fn publish_accession_then_ack(
    ctx: &Context,
    delivery: Delivery,
    msg: &VerificationMessage,
    accession_request: AccessionRequestMessage,
) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(&accession_request)?;
    ctx.schemas
        .validate("ingestion-accession-request.json", &payload)?;

    const ATTEMPTS: u32 = 3;
    let mut last_err = None;
    for attempt in 1..=ATTEMPTS {
        let publish = ctx
            .broker
            .publish(PublishArgs {
                exchange: "",
                routing_key: defaults::QUEUE_ACCESSION_REQUEST,
                correlation_id: &msg.correlation_id,
                body: &payload,
                durable: ctx.durable,
            })
            .await;

        match publish {
            Ok(()) => {
                delivery.ack().await?;
                return Ok(());
            }
            Err(err) => {
                tracing::warn!(%err, attempt, file_id = msg.file_id, "accession-request publish attempt failed");
                last_err = Some(err);
                if attempt < ATTEMPTS {
                    tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                }
            }
        }
    }

    tracing::error!(
        file_id = msg.file_id,
        error = ?last_err,
        "administrative alert: accession-request undeliverable after retries, dead-lettering original message"
    );
    let body = serde_json::to_vec(msg)?;
    dead_letter(ctx, delivery, &body).await
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

/// The streaming tee/decrypt/tee pipeline (spec.md §4.4 steps 2-6) plus the
/// commit decision (steps 7-8).
async fn verify_file(ctx: &Context, msg: &VerificationMessage) -> Result<Outcome, VerifyError> {
    let header = ctx.db.get_header(msg.file_id).await?;

    let expected = expected_sha256(&msg.encrypted_checksums).ok_or_else(|| {
        VerifyError::Policy(format!(
            "verification message for file {} carries no SHA-256 encrypted checksum to compare against",
            msg.file_id
        ))
    })?;

    let archive_reader = ctx.archive.reader(&msg.archive_path).await?;
    let (tee_reader, tee_handle) = SharedSha256Reader::new(archive_reader);

    let decrypted = ctx
        .decryptor
        .decrypt(&header, &ctx.private_key, Box::new(tee_reader))
        .await?;

    let mut dual = DualHashReader::new(decrypted);
    tokio::io::copy(&mut dual, &mut tokio::io::sink()).await?;

    let encrypted_checksum = tee_handle.digest();
    let (decrypted_checksums, decrypted_size) = dual.finish();

    if encrypted_checksum.value != expected.value {
        return Err(VerifyError::Policy(format!(
            "encrypted checksum mismatch for file {}: stored {}, recomputed {}",
            msg.file_id, expected.value, encrypted_checksum.value
        )));
    }

    if msg.re_verify {
        return Ok(Outcome::ReVerifySilent);
    }

    let decrypted_sha256 = decrypted_checksums
        .iter()
        .find(|c| c.checksum_type == ChecksumType::Sha256)
        .expect("DualHashReader::finish always yields a SHA-256 entry");

    ctx.db
        .mark_completed(
            msg.file_id,
            decrypted_size as i64,
            &decrypted_sha256.value,
            ChecksumType::Sha256,
        )
        .await?;

    Ok(Outcome::Completed(AccessionRequestMessage {
        file_id: msg.file_id,
        user: msg.user.clone(),
        filepath: msg.filepath.clone(),
        decrypted_checksums,
        correlation_id: msg.correlation_id.clone(),
    }))
}

fn expected_sha256(checksums: &[Checksum]) -> Option<&Checksum> {
    checksums
        .iter()
        .find(|c| c.checksum_type == ChecksumType::Sha256)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_conflict_is_conflict_not_policy() {
        let err: VerifyError = DbError::conflict("already completed").into();
        assert!(err.is_conflict());
        assert!(!err.wants_error_status());
    }

    #[test]
    fn storage_io_is_transient() {
        let err: VerifyError = StorageError::io("x", std::io::Error::other("disk full")).into();
        assert!(err.is_transient());
    }

    #[test]
    fn crypt4gh_key_mismatch_is_policy() {
        let err: VerifyError = Crypt4GhError::KeyMismatch.into();
        assert!(err.wants_error_status());
    }

    #[test]
    fn missing_header_is_policy() {
        let err: VerifyError = DbError::not_found("no header").into();
        assert!(err.wants_error_status());
    }

    #[test]
    fn expected_sha256_picks_sha_over_md5() {
        let checksums = vec![
            Checksum {
                checksum_type: ChecksumType::Md5,
                value: "abc".to_string(),
            },
            Checksum {
                checksum_type: ChecksumType::Sha256,
                value: "def".to_string(),
            },
        ];
        assert_eq!(expected_sha256(&checksums).unwrap().value, "def");
    }

    #[test]
    fn expected_sha256_absent_returns_none() {
        let checksums = vec![Checksum {
            checksum_type: ChecksumType::Md5,
            value: "abc".to_string(),
        }];
        assert!(expected_sha256(&checksums).is_none());
    }
}
