//! Structured events recorded by the in-process broker.
//!
//! The journal is the broker's view of what happened, in order. Tests read
//! it to check acknowledgment ordering and how many connections published.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A structured event recorded by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    /// When this event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ConnectionOpened {
        connection: Uuid,
    },
    ConnectionClosed {
        connection: Uuid,
        requeued: usize,
    },
    QueueBound {
        exchange: String,
        queue: String,
        routing_key: String,
    },
    Published {
        connection: Uuid,
        exchange: String,
        routing_key: String,
        routed_to: usize,
    },
    Delivered {
        queue: String,
        tag: u64,
        redelivered: bool,
    },
    Acked {
        connection: Uuid,
        queue: String,
        tag: u64,
    },
}
