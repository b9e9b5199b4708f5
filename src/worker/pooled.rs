//! Worker that hands its output to a separately sized publisher pool.

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

/// Queues the publish on the publisher pool and acknowledges straight away.
/// The ack follows the hand-off, not the broker's acceptance: a publish that
/// fails afterwards is lost.
pub struct PooledPublisherWorker {
    publishers: Arc<PublisherPool>,
    routing_key: String,
    member: usize,
}

#[async_trait]
impl Actor for PooledPublisherWorker {
    type Msg = Delivery;

    async fn handle(&mut self, delivery: Delivery) -> Result<()> {
        let span = start_delivery_span(WorkerKind::Pooled.as_str(), self.member, delivery.tag());
        async {
            let started = Instant::now();
            let result = codec::transform(&delivery.payload)?;
            self.publishers.publish(result, &self.routing_key)?;
            finish(WorkerKind::Pooled, delivery.handle, started).await
        }
        .instrument(span.clone())
        .await
        .inspect(|_| record_outcome(&span, "handed_off"))
        .inspect_err(|_| record_outcome(&span, "failed"))
    }
}

pub struct PooledPublisherFactory {
    publishers: Arc<PublisherPool>,
    routing_key: String,
}

impl PooledPublisherFactory {
    pub fn new(publishers: Arc<PublisherPool>, routing_key: impl Into<String>) -> Self {
        Self {
            publishers,
            routing_key: routing_key.into(),
        }
    }
}

#[async_trait]
impl ActorFactory for PooledPublisherFactory {
    type Actor = PooledPublisherWorker;

    async fn build(&self, member: usize) -> Result<PooledPublisherWorker> {
        debug!(
            member,
            exchange = self.publishers.exchange(),
            publishers = self.publishers.size(),
            "creating pooled-publisher worker"
        );
        Ok(PooledPublisherWorker {
            publishers: Arc::clone(&self.publishers),
            routing_key: self.routing_key.clone(),
            member,
        })
    }
}
