//! Consume loop for the mapper worker (spec.md §4.5): associates accession
//! ids with a dataset id. Terminal stage — no downstream publish.

use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;

use sda_broker::{Broker, Delivery, PublishArgs};
use sda_db::{Db, DbError};
use sda_protocol::{defaults, DatasetMappingMessage, SchemaRegistry};
use tokio::sync::Notify;

pub struct Context {
    pub db: Db,
    pub broker: Broker,
    pub schemas: Arc<SchemaRegistry>,
    pub durable: bool,
    pub shutdown: Arc<Notify>,
}

#[derive(Error, Debug)]
enum MapperError {
    #[error("policy violation: {0}")]
    Policy(String),
    #[error("transient: {0}")]
    Transient(String),
}

impl MapperError {
    fn is_transient(&self) -> bool {
        matches!(self, MapperError::Transient(_))
    }
}

impl From<DbError> for MapperError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sql(_) => MapperError::Transient(err.to_string()),
            DbError::NotFound(_)
            | DbError::Constraint(_)
            | DbError::InvalidState(_)
            | DbError::Conflict(_) => MapperError::Policy(err.to_string()),
            DbError::Serialization(_) => MapperError::Policy(err.to_string()),
        }
    }
}

/// Drive the mapper consume loop until the broker stream ends or the
/// connection is lost.
pub async fn run(ctx: Context) -> anyhow::Result<()> {
    let ctx = Arc::new(ctx);
    let deliveries = ctx.broker.consume(defaults::QUEUE_MAPPINGS, "sda-mapper").await?;
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
                                tracing::error!(%err, "failed to process mapper delivery");
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

    if let Err(err) = ctx.schemas.validate("dataset-mapping.json", &body) {
        tracing::warn!(%err, "dataset mapping message failed schema validation");
        return dead_letter(ctx, delivery, &body).await;
    }

    let msg: DatasetMappingMessage = match serde_json::from_slice(&body) {
        Ok(msg) => msg,
        Err(err) => {
            tracing::warn!(%err, "dataset mapping message is not valid JSON");
            return dead_letter(ctx, delivery, &body).await;
        }
    };

    match map_dataset(ctx, &msg).await {
        Ok(()) => {
            delivery.ack().await?;
            Ok(())
        }
        Err(err) if err.is_transient() => {
            tracing::warn!(%err, dataset_id = %msg.dataset_id, "leaving mapper delivery unacked for redelivery");
            Ok(())
        }
        Err(err) => {
            tracing::warn!(%err, dataset_id = %msg.dataset_id, "dead-lettering dataset mapping message");
            dead_letter(ctx, delivery, &body).await
        }
    }
}

async fn map_dataset(ctx: &Context, msg: &DatasetMappingMessage) -> Result<(), MapperError> {
    ctx.db
        .map_dataset(&msg.dataset_id, &msg.accession_ids)
        .await?;
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
    fn sql_error_is_transient() {
        let err: MapperError = DbError::Sql(sqlx::Error::RowNotFound).into();
        assert!(err.is_transient());
    }

    #[test]
    fn constraint_violation_is_policy() {
        let err: MapperError = DbError::constraint("bad mapping").into();
        assert!(!err.is_transient());
    }
}
