//! Broker client seam.
//!
//! A [`Broker`] hands out [`Connection`]s. A connection declares topic
//! exchanges, binds queues, publishes, and subscribes with manual
//! acknowledgment. [`memory::MemoryBroker`] is the in-process implementation
//! used by the harness and the tests.

pub mod event;
pub mod memory;
pub mod topic;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;
use crate::model::BindingSpec;

pub use memory::MemoryBroker;

/// Something that can open broker connections.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Open a new connection. Each caller owns the connection it gets.
    async fn connect(&self) -> Result<Arc<dyn Connection>>;
}

/// One open broker connection.
#[async_trait]
pub trait Connection: Send + Sync {
    fn id(&self) -> Uuid;

    fn is_open(&self) -> bool;

    /// Declare a topic exchange. Idempotent.
    async fn declare_exchange(&self, name: &str) -> Result<()>;

    /// Declare `binding.queue` and bind it to `binding.exchange` by
    /// `binding.routing_key`. The exchange must already be declared.
    async fn bind_queue(&self, binding: &BindingSpec) -> Result<()>;

    async fn publish(&self, exchange: &str, routing_key: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to a queue with manual acknowledgment.
    async fn subscribe(&self, queue: &str) -> Result<Subscription>;

    /// Close the connection. Unacknowledged deliveries go back to their queue.
    async fn close(&self);
}

/// Broker-side acknowledgment endpoint for a delivery.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self, tag: u64) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// A message delivered to a subscriber.
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub redelivered: bool,
    pub delivered_at: DateTime<Utc>,
    pub handle: DeliveryHandle,
}

impl Delivery {
    pub fn tag(&self) -> u64 {
        self.handle.tag
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("tag", &self.handle.tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("bytes", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

/// Acknowledgment token for one delivery.
///
/// `ack` consumes the handle, so a delivery can be acknowledged at most once.
/// Dropping it unacknowledged leaves the message pending on the broker.
pub struct DeliveryHandle {
    tag: u64,
    acker: Arc<dyn Acker>,
}

impl DeliveryHandle {
    pub fn new(tag: u64, acker: Arc<dyn Acker>) -> Self {
        Self { tag, acker }
    }

    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub async fn ack(self) -> Result<()> {
        self.acker.ack(self.tag).await
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Stream of deliveries for one subscriber.
pub struct Subscription {
    queue: String,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    pub fn new(queue: impl Into<String>, rx: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self {
            queue: queue.into(),
            rx,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Next delivery, or `None` once the connection is closed.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

// ---------------------------------------------------------------------------
// Exchange handle
// ---------------------------------------------------------------------------

/// A declared topic exchange on a specific connection.
#[derive(Clone)]
pub struct Exchange {
    connection: Arc<dyn Connection>,
    name: String,
}

impl Exchange {
    /// Declare `name` on `connection` and return a handle to it.
    pub async fn declare(connection: Arc<dyn Connection>, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        connection.declare_exchange(&name).await?;
        Ok(Self { connection, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub async fn publish(&self, payload: Vec<u8>, routing_key: &str) -> Result<()> {
        self.connection
            .publish(&self.name, routing_key, payload)
            .await
    }
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("name", &self.name)
            .field("connection", &self.connection.id())
            .finish()
    }
}
