//! Worker that publishes through one publisher shared by the whole pool.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{Instrument, debug};

use super::{WorkerKind, finish};
use crate::broker::Delivery;
use crate::codec;
use crate::error::Result;
use crate::pool::{Actor, ActorFactory};
use crate::publisher::PublisherPool;
use crate::telemetry::delivery::{record_outcome, start_delivery_span};

/// Waits on the shared publisher for every message. The publisher's single
/// mailbox serializes the whole pool's output, so publish throughput is that
/// of one channel however many workers there are.
pub struct SharedPublisherWorker {
    publisher: Arc<PublisherPool>,
    routing_key: String,
    member: usize,
}

#[async_trait]
impl Actor for SharedPublisherWorker {
    type Msg = Delivery;

    async fn handle(&mut self, delivery: Delivery) -> Result<()> {
        let span = start_delivery_span(WorkerKind::Shared.as_str(), self.member, delivery.tag());
        async {
            let started = Instant::now();
            let result = codec::transform(&delivery.payload)?;
            self.publisher
                .publish_and_wait(result, &self.routing_key)
                .await?;
            finish(WorkerKind::Shared, delivery.handle, started).await
        }
        .instrument(span.clone())
        .await
        .inspect(|_| record_outcome(&span, "published"))
        .inspect_err(|_| record_outcome(&span, "failed"))
    }
}

pub struct SharedPublisherFactory {
    publisher: Arc<PublisherPool>,
    routing_key: String,
}

impl SharedPublisherFactory {
    pub fn new(publisher: Arc<PublisherPool>, routing_key: impl Into<String>) -> Self {
        Self {
            publisher,
            routing_key: routing_key.into(),
        }
    }
}

#[async_trait]
impl ActorFactory for SharedPublisherFactory {
    type Actor = SharedPublisherWorker;

    async fn build(&self, member: usize) -> Result<SharedPublisherWorker> {
        debug!(member, exchange = self.publisher.exchange(), "creating shared-publisher worker");
        Ok(SharedPublisherWorker {
            publisher: Arc::clone(&self.publisher),
            routing_key: self.routing_key.clone(),
            member,
        })
    }
}
