//! Worker that owns its own broker connection.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{Instrument, debug};

use super::{WorkerKind, finish};
use crate::broker::{Broker, Delivery, Exchange};
use crate::codec;
use crate::error::Result;
use crate::pool::{Actor, ActorFactory};
use crate::telemetry::delivery::{record_outcome, start_delivery_span};

/// Signs each work item and publishes it over a connection no other worker
/// touches. One connection per pool member.
pub struct DirectPublishWorker {
    exchange: Exchange,
    routing_key: String,
    member: usize,
}

#[async_trait]
impl Actor for DirectPublishWorker {
    type Msg = Delivery;

    async fn handle(&mut self, delivery: Delivery) -> Result<()> {
        let span = start_delivery_span(WorkerKind::Direct.as_str(), self.member, delivery.tag());
        async {
            let started = Instant::now();
            let result = codec::transform(&delivery.payload)?;
            self.exchange.publish(result, &self.routing_key).await?;
            finish(WorkerKind::Direct, delivery.handle, started).await
        }
        .instrument(span.clone())
        .await
        .inspect(|_| record_outcome(&span, "published"))
        .inspect_err(|_| record_outcome(&span, "failed"))
    }

    async fn stopped(&mut self) {
        debug!(member = self.member, "direct worker closing connection");
        self.exchange.connection().close().await;
    }
}

/// Opens a fresh connection and exchange handle for every worker it builds.
pub struct DirectPublishFactory {
    broker: Arc<dyn Broker>,
    exchange: String,
    routing_key: String,
}

impl DirectPublishFactory {
    pub fn new(
        broker: Arc<dyn Broker>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }
}

#[async_trait]
impl ActorFactory for DirectPublishFactory {
    type Actor = DirectPublishWorker;

    async fn build(&self, member: usize) -> Result<DirectPublishWorker> {
        debug!(member, exchange = %self.exchange, routing_key = %self.routing_key, "creating direct worker");
        let connection = self.broker.connect().await?;
        let exchange = Exchange::declare(connection, self.exchange.clone()).await?;
        Ok(DirectPublishWorker {
            exchange,
            routing_key: self.routing_key.clone(),
            member,
        })
    }
}
