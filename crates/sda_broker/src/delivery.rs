//! A single consumed message and its acknowledgement handle.

use lapin::options::{BasicAckOptions, BasicNackOptions};

use crate::error::{BrokerError, Result};

/// Wraps a `lapin` delivery with the ack/nack contract spec.md §4.1
/// describes: positive ack, or negative ack with the caller's choice of
/// `requeue`.
pub struct Delivery {
    pub(crate) inner: lapin::message::Delivery,
}

impl Delivery {
    pub fn data(&self) -> &[u8] {
        &self.inner.data
    }

    pub fn correlation_id(&self) -> Result<&str> {
        self.inner
            .properties
            .correlation_id()
            .as_ref()
            .map(|c| c.as_str())
            .ok_or(BrokerError::MissingCorrelationId)
    }

    pub async fn ack(self) -> Result<()> {
        self.inner
            .ack(BasicAckOptions::default())
            .await
            .map_err(Into::into)
    }

    pub async fn nack(self, requeue: bool) -> Result<()> {
        self.inner
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
            .map_err(Into::into)
    }
}
