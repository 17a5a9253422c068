//! Consume loop for the finalize worker (spec.md §4.5): assigns the stable
//! accession id and publishes the completion message that backup consumes.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;

use sda_broker::{Broker, Delivery, PublishArgs};
use sda_db::{Db, DbError};
use sda_protocol::{defaults, AccessionMessage, CompletionMessage, SchemaRegistry};
use tokio::sync::Notify;

pub struct Context {
    pub db: Db,
    pub broker: Broker,
    pub schemas: Arc<SchemaRegistry>,
    pub durable: bool,
    pub shutdown: Arc<Notify>,
}

/// Handler-boundary classification (shared shape, spec.md §7).
#[derive(Error, Debug)]
enum FinalizeError {
    #[error("malformed: {0}")]
    Malformed(String),
    #[error("policy violation: {0}")]
    Policy(String),
    #[error("transient: {0}")]
    Transient(String),
}

impl FinalizeError {
    fn is_transient(&self) -> bool {
        matches!(self, FinalizeError::Transient(_))
    }
    fn wants_error_status(&self) -> bool {
        matches!(self, FinalizeError::Policy(_))
    }
}

impl From<DbError> for FinalizeError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sql(_) => FinalizeError::Transient(err.to_string()),
            // `set_accession_id` has no race that returns `Conflict` — its
            // idempotent-match case is `Ok(())` and a mismatch is always a
            // `Constraint`. Kept here only because `DbError` is shared with
            // `mark_completed`, which does produce it.
            DbError::NotFound(_)
            | DbError::Constraint(_)
            | DbError::InvalidState(_)
            | DbError::Conflict(_) => FinalizeError::Policy(err.to_string()),
            DbError::Serialization(_) => FinalizeError::Malformed(err.to_string()),
        }
    }
}

/// Drive the finalize consume loop until the broker stream ends or the
/// connection is lost.
pub async fn run(ctx: Context) -> anyhow::Result<()> {
    let ctx = Arc::new(ctx);
    let deliveries = ctx.broker.consume(defaults::QUEUE_ACCESSION, "sda-finalize").await?;
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
                                tracing::error!(%err, "failed to process finalize delivery");
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

    if let Err(err) = ctx.schemas.validate("ingestion-accession.json", &body) {
        tracing::warn!(%err, "accession message failed schema validation");
        return dead_letter(ctx, delivery, &body).await;
    }

    let msg: AccessionMessage = match serde_json::from_slice(&body) {
        Ok(msg) => msg,
        Err(err) => {
            tracing::warn!(%err, "accession message is not valid JSON");
            return dead_letter(ctx, delivery, &body).await;
        }
    };

    match finalize_file(ctx, &msg).await {
        Ok(completion) => publish_completion_then_ack(ctx, delivery, &msg, completion).await,
        Err(err) if err.is_transient() => {
            tracing::warn!(%err, file_id = msg.file_id, "leaving finalize delivery unacked for redelivery");
            Ok(())
        }
        Err(err) => {
            if err.wants_error_status() {
                if let Err(mark_err) = ctx.db.mark_error(msg.file_id).await {
                    tracing::warn!(%mark_err, file_id = msg.file_id, "failed to mark file as errored");
                }
            }
            tracing::warn!(%err, file_id = msg.file_id, "dead-lettering accession message");
            dead_letter(ctx, delivery, &body).await
        }
    }
}

async fn finalize_file(
    ctx: &Context,
    msg: &AccessionMessage,
) -> Result<CompletionMessage, FinalizeError> {
    ctx.db.set_accession_id(msg.file_id, &msg.accession_id).await?;

    let file = ctx.db.get_file(msg.file_id).await?;
    let archive_path = file.archive_path.ok_or_else(|| {
        FinalizeError::Policy(format!(
            "file {} reached READY with no archive_path recorded",
            msg.file_id
        ))
    })?;

    Ok(CompletionMessage {
        file_id: msg.file_id,
        accession_id: msg.accession_id.clone(),
        archive_path,
        correlation_id: msg.correlation_id.clone(),
    })
}

async fn publish_completion_then_ack(
    ctx: &Context,
    delivery: Delivery,
    msg: &AccessionMessage,
    completion: CompletionMessage,
) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(&completion)?;
    ctx.schemas.validate("ingestion-completion.json", &payload)?;

    const ATTEMPTS: u32 = 3;
    let mut last_err = None;
    for attempt in 1..=ATTEMPTS {
        let publish = ctx
            .broker
            .publish(PublishArgs {
                exchange: "",
                routing_key: defaults::QUEUE_COMPLETED,
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
                tracing::warn!(%err, attempt, file_id = msg.file_id, "completion publish attempt failed");
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
        "administrative alert: completion message undeliverable after retries, dead-lettering original message"
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_violation_is_policy() {
        let err: FinalizeError = DbError::constraint("accession id already in use").into();
        assert!(err.wants_error_status());
    }

    /// `set_accession_id` never returns `Conflict`, but `DbError::Conflict`
    /// still has to fold into some branch since the enum is shared with
    /// `mark_completed`; finalize treats it the same as any other policy
    /// failure rather than exposing an unreachable conflict path.
    #[test]
    fn db_conflict_is_policy_not_transient() {
        let err: FinalizeError = DbError::conflict("already assigned").into();
        assert!(err.wants_error_status());
        assert!(!err.is_transient());
    }

    #[test]
    fn not_found_is_policy_not_transient() {
        let err: FinalizeError = DbError::not_found("no file with that id").into();
        assert!(err.wants_error_status());
        assert!(!err.is_transient());
    }
}
