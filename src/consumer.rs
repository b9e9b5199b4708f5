//! Consumer pool: subscribes to a queue and fans deliveries out to a pool
//! of workers.

use std::sync::Arc;

use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::broker::{Broker, Connection, Delivery, Subscription};
use crate::error::Result;
use crate::model::BindingSpec;
use crate::pool::{Actor, ActorFactory, Pool, RestartPolicy};
use crate::telemetry::metrics;

/// A queue subscription feeding a fixed pool of workers.
///
/// The subscription loop only enqueues; it never waits for a worker. Any
/// backpressure comes from the broker's unacknowledged backlog.
pub struct ConsumerPool<A: Actor<Msg = Delivery>> {
    binding: BindingSpec,
    pool: Arc<Pool<A>>,
    connection: Arc<dyn Connection>,
    shutdown: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<A: Actor<Msg = Delivery>> ConsumerPool<A> {
    /// Start `size` workers from `factory`, bind `binding.queue` and begin
    /// dispatching deliveries.
    pub async fn start<F>(
        broker: Arc<dyn Broker>,
        binding: BindingSpec,
        size: usize,
        factory: F,
        policy: RestartPolicy,
    ) -> Result<Self>
    where
        F: ActorFactory<Actor = A>,
    {
        info!(binding = %binding, size, "creating consumer pool");
        let pool_name = format!("consumer:{}", binding.queue);
        let pool = Arc::new(Pool::spawn(pool_name, size, factory, policy).await?);

        let connection = broker.connect().await?;
        connection.declare_exchange(&binding.exchange).await?;
        connection.bind_queue(&binding).await?;
        let subscription = connection.subscribe(&binding.queue).await?;

        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(dispatch_loop(
            Arc::clone(&pool),
            subscription,
            Arc::clone(&shutdown),
        ));

        Ok(Self {
            binding,
            pool,
            connection,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn binding(&self) -> &BindingSpec {
        &self.binding
    }

    /// The worker pool, for inspection.
    pub fn pool(&self) -> &Pool<A> {
        &self.pool
    }

    /// Stop consuming, let workers finish what they hold, then close the
    /// subscription's connection. Anything still unacknowledged goes back to
    /// the queue.
    pub async fn shutdown(&self) {
        self.shutdown.notify_one();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(queue = %self.binding.queue, "dispatch loop ended abnormally: {e}");
            }
        }
        self.pool.shutdown().await;
        self.connection.close().await;
        info!(queue = %self.binding.queue, "consumer pool stopped");
    }
}

async fn dispatch_loop<A: Actor<Msg = Delivery>>(
    pool: Arc<Pool<A>>,
    mut subscription: Subscription,
    shutdown: Arc<Notify>,
) {
    let queue = subscription.queue().to_string();
    debug!(queue = %queue, "dispatch loop started");

    loop {
        let delivery = tokio::select! {
            _ = shutdown.notified() => break,
            next = subscription.next() => match next {
                Some(delivery) => delivery,
                None => {
                    info!(queue = %queue, "subscription closed");
                    break;
                }
            },
        };

        let tag = delivery.tag();
        let result = match pool.cast(delivery) {
            Ok(()) => "ok",
            Err(e) => {
                // The delivery is dropped unacknowledged and stays with the broker.
                error!(queue = %queue, tag, error = %e, "dispatch failed");
                "rejected"
            }
        };
        metrics::deliveries_dispatched().add(
            1,
            &[
                KeyValue::new("queue", queue.clone()),
                KeyValue::new("result", result),
            ],
        );
    }
}
