//! Emits numbered test messages onto the start topic.

use tracing::debug;

use super::TEST_KEY;
use super::topology::Topology;
use crate::broker::{Broker, Exchange};
use crate::codec;
use crate::error::Result;
use crate::model::WorkItem;

pub struct TestPublisher {
    exchange: Exchange,
    routing_key: String,
}

impl TestPublisher {
    pub async fn connect(broker: &dyn Broker, topology: &Topology) -> Result<Self> {
        let connection = broker.connect().await?;
        let exchange = Exchange::declare(connection, topology.start_exchange.clone()).await?;
        Ok(Self {
            exchange,
            routing_key: topology.routing_key.clone(),
        })
    }

    /// The item published as message number `i`.
    pub fn message(i: u64) -> WorkItem {
        WorkItem::new(TEST_KEY, format!("message_{i}"))
    }

    /// Publish `message_1` through `message_{count}`, in order.
    pub async fn publish(&self, count: u64) -> Result<()> {
        for i in 1..=count {
            let payload = codec::encode(&Self::message(i))?;
            self.exchange.publish(payload, &self.routing_key).await?;
        }
        debug!(count, exchange = self.exchange.name(), "test messages published");
        Ok(())
    }

    /// Publish an arbitrary payload, e.g. one crafted to fail.
    pub async fn publish_raw(&self, payload: Vec<u8>, routing_key: &str) -> Result<()> {
        self.exchange.publish(payload, routing_key).await
    }

    pub async fn close(self) {
        self.exchange.connection().close().await;
    }
}

impl std::fmt::Debug for TestPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestPublisher")
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .finish()
    }
}
