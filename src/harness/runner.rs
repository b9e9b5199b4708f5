//! Wires a consumer pool between the start and finished topics and measures
//! how fast a batch makes the round trip.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::consumer::TestConsumer;
use super::publisher::TestPublisher;
use super::report::RunReport;
use super::topology::Topology;
use crate::broker::Broker;
use crate::consumer::ConsumerPool;
use crate::error::{Error, Result};
use crate::pool::RestartPolicy;
use crate::publisher::PublisherPool;
use crate::worker::{
    DirectPublishFactory, DirectPublishWorker, PooledPublisherFactory, PooledPublisherWorker,
    SharedPublisherFactory, SharedPublisherWorker, WorkerKind,
};

/// Knobs for a [`Runner`].
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Consumer pool size.
    pub pool_size: usize,
    /// Publisher pool size for the pooled variant.
    pub publisher_pool_size: usize,
    pub restart: RestartPolicy,
    /// Upper bound between checks of the test consumer's counters.
    pub poll_interval: Duration,
    /// Give up after this long even if messages are still arriving.
    pub wait_timeout: Duration,
    /// Give up after this long without a single new message.
    pub idle_timeout: Duration,
    pub topology: Topology,
}

impl RunnerConfig {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            publisher_pool_size: PublisherPool::DEFAULT_SIZE,
            restart: RestartPolicy::Never,
            poll_interval: Duration::from_millis(10),
            wait_timeout: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(30),
            topology: Topology::default(),
        }
    }
}

enum Dispatch {
    Direct(ConsumerPool<DirectPublishWorker>),
    Shared {
        workers: ConsumerPool<SharedPublisherWorker>,
        publisher: Arc<PublisherPool>,
    },
    Pooled {
        workers: ConsumerPool<PooledPublisherWorker>,
        publishers: Arc<PublisherPool>,
    },
}

/// A consumer pool of one worker variant, plus whatever publish-side
/// collaborator that variant needs.
pub struct Runner {
    broker: Arc<dyn Broker>,
    kind: WorkerKind,
    config: RunnerConfig,
    dispatch: Dispatch,
}

impl Runner {
    pub async fn new(
        broker: Arc<dyn Broker>,
        kind: WorkerKind,
        config: RunnerConfig,
    ) -> Result<Self> {
        let topology = &config.topology;
        let consume = topology.start_binding();
        let exchange = topology.finished_exchange.clone();
        let routing_key = topology.routing_key.clone();

        info!(
            worker = %kind,
            pool_size = config.pool_size,
            consume = %consume,
            publish = %topology.finished_binding(),
            "building runner"
        );

        let dispatch = match kind {
            WorkerKind::Direct => {
                let factory = DirectPublishFactory::new(Arc::clone(&broker), exchange, routing_key);
                let workers = ConsumerPool::start(
                    Arc::clone(&broker),
                    consume,
                    config.pool_size,
                    factory,
                    config.restart,
                )
                .await?;
                Dispatch::Direct(workers)
            }
            WorkerKind::Shared => {
                let publisher = Arc::new(
                    PublisherPool::shared(Arc::clone(&broker), exchange, config.restart).await?,
                );
                let factory = SharedPublisherFactory::new(Arc::clone(&publisher), routing_key);
                let workers = ConsumerPool::start(
                    Arc::clone(&broker),
                    consume,
                    config.pool_size,
                    factory,
                    config.restart,
                )
                .await?;
                Dispatch::Shared { workers, publisher }
            }
            WorkerKind::Pooled => {
                let publishers = Arc::new(
                    PublisherPool::start(
                        Arc::clone(&broker),
                        exchange,
                        config.publisher_pool_size,
                        config.restart,
                    )
                    .await?,
                );
                let factory = PooledPublisherFactory::new(Arc::clone(&publishers), routing_key);
                let workers = ConsumerPool::start(
                    Arc::clone(&broker),
                    consume,
                    config.pool_size,
                    factory,
                    config.restart,
                )
                .await?;
                Dispatch::Pooled {
                    workers,
                    publishers,
                }
            }
        };

        Ok(Self {
            broker,
            kind,
            config,
            dispatch,
        })
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Consumer pool members still running.
    pub fn live_workers(&self) -> usize {
        match &self.dispatch {
            Dispatch::Direct(workers) => workers.pool().live_members(),
            Dispatch::Shared { workers, .. } => workers.pool().live_members(),
            Dispatch::Pooled { workers, .. } => workers.pool().live_members(),
        }
    }

    /// Members of the publish-side pool, if this variant has one.
    pub fn publisher_pool_size(&self) -> Option<usize> {
        match &self.dispatch {
            Dispatch::Direct(_) => None,
            Dispatch::Shared { publisher, .. } => Some(publisher.size()),
            Dispatch::Pooled { publishers, .. } => Some(publishers.size()),
        }
    }

    /// Publish `num_messages` items and wait until each has come back.
    pub async fn run_test(&self, num_messages: u64) -> Result<RunReport> {
        info!(messages = num_messages, worker = %self.kind, "starting tests");
        let topology = &self.config.topology;

        let consumer = TestConsumer::start(self.broker.as_ref(), topology).await?;
        let publisher = match TestPublisher::connect(self.broker.as_ref(), topology).await {
            Ok(publisher) => publisher,
            Err(e) => {
                consumer.close().await;
                return Err(e);
            }
        };

        let outcome = self.drive(&consumer, &publisher, num_messages).await;

        publisher.close().await;
        consumer.close().await;
        outcome
    }

    async fn drive(
        &self,
        consumer: &TestConsumer,
        publisher: &TestPublisher,
        num_messages: u64,
    ) -> Result<RunReport> {
        let publish_started = Instant::now();
        publisher.publish(num_messages).await?;
        let publish_time = publish_started.elapsed();
        info!(elapsed_ms = publish_time.as_millis() as u64, "messages published");

        let consumed_before_wait = consumer.tally().consumed;
        let wait_started = Instant::now();
        self.wait_for(consumer, num_messages).await?;
        let wait_time = wait_started.elapsed();

        Ok(RunReport::new(
            self.kind,
            self.config.pool_size,
            num_messages,
            consumer.tally(),
            consumed_before_wait,
            publish_time,
            wait_time,
        ))
    }

    /// Wait until `expected` messages are accounted for, waking on every
    /// tallied message and at least once per poll interval.
    async fn wait_for(&self, consumer: &TestConsumer, expected: u64) -> Result<()> {
        let started = Instant::now();
        let mut last_progress = started;
        let mut last_seen = consumer.tally().accounted();

        loop {
            let accounted = consumer.tally().accounted();
            if accounted >= expected {
                return Ok(());
            }
            if accounted != last_seen {
                last_seen = accounted;
                last_progress = Instant::now();
            }

            let idle = last_progress.elapsed();
            if idle >= self.config.idle_timeout {
                warn!(expected, accounted, live_workers = self.live_workers(), "run stalled");
                return Err(Error::MessagesLost {
                    expected,
                    accounted,
                    idle,
                });
            }
            let elapsed = started.elapsed();
            if elapsed >= self.config.wait_timeout {
                warn!(expected, accounted, "run timed out");
                return Err(Error::Timeout {
                    expected,
                    accounted,
                    elapsed,
                });
            }

            tokio::select! {
                _ = consumer.progressed() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Stop consuming, drain the pools and close every connection they own.
    pub async fn shutdown(self) {
        match self.dispatch {
            Dispatch::Direct(workers) => workers.shutdown().await,
            Dispatch::Shared { workers, publisher } => {
                workers.shutdown().await;
                publisher.shutdown().await;
            }
            Dispatch::Pooled {
                workers,
                publishers,
            } => {
                workers.shutdown().await;
                publishers.shutdown().await;
            }
        }
        info!(worker = %self.kind, "runner stopped");
    }
}
