//! Outbound-only publisher pool.
//!
//! Each member owns its own connection and one handle to the configured
//! topic exchange. A size-1 pool is the shared publisher: its single mailbox
//! serializes every publish issued through it.

use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::broker::{Broker, Exchange};
use crate::error::Result;
use crate::pool::{Actor, ActorFactory, Pool, RestartPolicy};
use crate::telemetry::metrics;

/// One outbound message. With a `reply`, the caller gets the broker's
/// answer and the member survives a failure. Without one, a failure ends
/// the member.
pub struct PublishRequest {
    pub payload: Vec<u8>,
    pub routing_key: String,
    pub reply: Option<oneshot::Sender<Result<()>>>,
}

pub struct PublishActor {
    exchange: Exchange,
    member: usize,
}

#[async_trait]
impl Actor for PublishActor {
    type Msg = PublishRequest;

    async fn handle(&mut self, msg: PublishRequest) -> Result<()> {
        let result = self.exchange.publish(msg.payload, &msg.routing_key).await;
        metrics::publishes().add(
            1,
            &[
                KeyValue::new("exchange", self.exchange.name().to_string()),
                KeyValue::new("result", if result.is_ok() { "ok" } else { "error" }),
            ],
        );

        match msg.reply {
            Some(reply) => {
                // Caller may have given up waiting; nothing to do then.
                let _ = reply.send(result);
                Ok(())
            }
            None => result,
        }
    }

    async fn stopped(&mut self) {
        debug!(
            exchange = self.exchange.name(),
            member = self.member,
            "publisher closing connection"
        );
        self.exchange.connection().close().await;
    }
}

pub struct PublishActorFactory {
    broker: Arc<dyn Broker>,
    exchange: String,
}

#[async_trait]
impl ActorFactory for PublishActorFactory {
    type Actor = PublishActor;

    async fn build(&self, member: usize) -> Result<PublishActor> {
        let connection = self.broker.connect().await?;
        let exchange = Exchange::declare(connection, self.exchange.clone()).await?;
        Ok(PublishActor { exchange, member })
    }
}

/// A fixed-size pool of publishers bound to one topic exchange.
pub struct PublisherPool {
    exchange: String,
    pool: Pool<PublishActor>,
}

impl PublisherPool {
    pub const DEFAULT_SIZE: usize = 2;

    pub async fn start(
        broker: Arc<dyn Broker>,
        exchange: impl Into<String>,
        size: usize,
        policy: RestartPolicy,
    ) -> Result<Self> {
        let exchange = exchange.into();
        info!(exchange = %exchange, size, "creating publisher pool");
        let factory = PublishActorFactory {
            broker,
            exchange: exchange.clone(),
        };
        let pool = Pool::spawn(format!("publisher:{exchange}"), size, factory, policy).await?;
        Ok(Self { exchange, pool })
    }

    /// A single publisher whose mailbox serializes all callers.
    pub async fn shared(
        broker: Arc<dyn Broker>,
        exchange: impl Into<String>,
        policy: RestartPolicy,
    ) -> Result<Self> {
        Self::start(broker, exchange, 1, policy).await
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn size(&self) -> usize {
        self.pool.size()
    }

    pub fn live_members(&self) -> usize {
        self.pool.live_members()
    }

    /// Fire-and-forget. Returns once the request is queued on a member.
    pub fn publish(&self, payload: Vec<u8>, routing_key: &str) -> Result<()> {
        self.pool.cast(PublishRequest {
            payload,
            routing_key: routing_key.to_string(),
            reply: None,
        })
    }

    /// Queue the request and wait until the broker has accepted it.
    pub async fn publish_and_wait(&self, payload: Vec<u8>, routing_key: &str) -> Result<()> {
        self.pool
            .call(|reply| PublishRequest {
                payload,
                routing_key: routing_key.to_string(),
                reply: Some(reply),
            })
            .await?
    }

    /// Drain queued publishes and close every member's connection.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
