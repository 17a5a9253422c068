//! AMQP 0-9-1 broker abstraction for the SDA ingestion pipeline (spec.md
//! §4.1). Reworks `casparian_worker::worker`'s connect/run event-loop shape
//! from ZeroMQ DEALER framing onto `lapin` channels.

pub mod delivery;
pub mod error;

pub use delivery::Delivery;
pub use error::{BrokerError, Result};

use std::sync::Arc;

use futures::{Stream, StreamExt};
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::Notify;
use tracing::{error, info};

/// A publish request. Delivery mode is persistent when `durable` is set,
/// matching spec.md §6's "delivery mode persistent when durable=true".
pub struct PublishArgs<'a> {
    pub exchange: &'a str,
    pub routing_key: &'a str,
    pub correlation_id: &'a str,
    pub body: &'a [u8],
    pub durable: bool,
}

/// Connected broker handle. Cheap to clone — wraps a `lapin::Channel`,
/// itself backed by an `Arc`-shared connection.
#[derive(Clone)]
pub struct Broker {
    channel: Channel,
    connection: Arc<Connection>,
    connection_error: Arc<Notify>,
}

impl Broker {
    /// Connect and open a confirm-mode channel (publishes await broker
    /// acknowledgement before this worker's own ack, per spec.md §4.1/§4.4's
    /// "DB commit → publish → ack" ordering).
    pub async fn connect(uri: &str) -> Result<Self> {
        let options = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);
        let connection = Connection::connect(uri, options).await?;

        let connection_error = Arc::new(Notify::new());
        let notify = connection_error.clone();
        connection.on_error(move |err| {
            error!(%err, "amqp connection error");
            notify.notify_waiters();
        });

        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        info!("connected to broker");
        Ok(Self {
            channel,
            connection: Arc::new(connection),
            connection_error,
        })
    }

    /// Cap the number of unacknowledged deliveries this worker holds at
    /// once (spec.md §5 — bounded concurrency per worker).
    pub async fn set_prefetch(&self, count: u16) -> Result<()> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await?;
        Ok(())
    }

    /// Consume from `queue`, yielding one [`Delivery`] per message.
    /// Deliveries the underlying connection fails to decode are logged and
    /// dropped rather than surfaced, since there is no delivery to ack/nack.
    pub async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<impl Stream<Item = Delivery>> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        Ok(consumer.filter_map(|result| async move {
            match result {
                Ok(inner) => Some(Delivery { inner }),
                Err(err) => {
                    error!(%err, "error receiving delivery");
                    None
                }
            }
        }))
    }

    /// Publish and wait for the broker's confirmation.
    pub async fn publish(&self, args: PublishArgs<'_>) -> Result<()> {
        let properties = BasicProperties::default()
            .with_correlation_id(args.correlation_id.into())
            .with_content_type("application/json".into())
            .with_delivery_mode(if args.durable { 2 } else { 1 });

        let confirm = self
            .channel
            .basic_publish(
                args.exchange,
                args.routing_key,
                BasicPublishOptions::default(),
                args.body,
                properties,
            )
            .await?
            .await?;

        match confirm {
            Confirmation::Ack(_) => Ok(()),
            _ => Err(BrokerError::NotConfirmed),
        }
    }

    /// Resolves when the underlying connection reports an error. Workers
    /// race this against their event loop to notice a dropped connection
    /// (spec.md §4.1 — `ConnectionWatcher`).
    pub async fn watch_connection(&self) {
        self.connection_error.notified().await;
    }

    /// Orderly shutdown (spec.md §5): close the channel, then the
    /// connection. Called after a worker stops consuming, never mid-delivery.
    pub async fn close(&self) -> Result<()> {
        self.channel.close(200, "worker shutting down").await?;
        self.connection.close(200, "worker shutting down").await?;
        Ok(())
    }
}
