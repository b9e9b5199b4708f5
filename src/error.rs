//! Error types for queue-pool.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("exchange not declared: {0}")]
    UnknownExchange(String),

    #[error("queue not declared: {0}")]
    UnknownQueue(String),

    #[error("connection {0} is closed")]
    ConnectionClosed(uuid::Uuid),

    #[error("every member of pool '{0}' has terminated")]
    PoolExhausted(String),

    #[error("mailbox closed before a reply was sent")]
    MailboxClosed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(
        "timed out after {elapsed:?} with {accounted}/{expected} messages accounted for (still in flight)"
    )]
    Timeout {
        expected: u64,
        accounted: u64,
        elapsed: Duration,
    },

    #[error(
        "no progress for {idle:?}: {accounted}/{expected} messages accounted for, the rest are presumed lost"
    )]
    MessagesLost {
        expected: u64,
        accounted: u64,
        idle: Duration,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
