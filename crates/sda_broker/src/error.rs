//! Errors returned by the broker abstraction.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Broker errors, classified per the Malformed/Policy/Transient/Conflict
/// taxonomy (spec.md §7). Connection failures and publish confirms that
/// time out are Transient; a payload the broker itself rejects is Policy.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("publish was not confirmed by the broker")]
    NotConfirmed,

    #[error("delivery carried no correlation id")]
    MissingCorrelationId,
}
