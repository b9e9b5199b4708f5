//! Checks every finished message against an independently computed digest.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::topology::Topology;
use crate::broker::{Broker, Connection, Subscription};
use crate::codec;
use crate::error::Result;
use crate::telemetry::metrics;

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    /// Messages whose `result` matched the recomputed digest.
    pub consumed: u64,
    /// Messages that failed to decode or carried a wrong `result`.
    pub errors: u64,
    /// Messages whose `value` had already been seen this run.
    pub duplicates: u64,
}

impl Tally {
    /// Messages with a terminal outcome.
    pub fn accounted(&self) -> u64 {
        self.consumed + self.errors
    }
}

/// Written only by the consumer task; read by anyone.
#[derive(Default)]
struct Counters {
    consumed: AtomicU64,
    errors: AtomicU64,
    duplicates: AtomicU64,
    seen: Mutex<HashSet<String>>,
    progress: Notify,
}

impl Counters {
    fn check(&self, payload: &[u8]) -> bool {
        let item = match codec::decode(payload) {
            Ok(item) => item,
            Err(e) => {
                warn!(error = %e, "finished message did not decode");
                self.errors.fetch_add(1, Ordering::Release);
                return false;
            }
        };

        if !self.seen.lock().insert(item.value.clone()) {
            warn!(value = %item.value, "duplicate finished message");
            self.duplicates.fetch_add(1, Ordering::Release);
        }

        let ok = item.verify();
        if ok {
            self.consumed.fetch_add(1, Ordering::Release);
        } else {
            debug!(value = %item.value, "digest mismatch");
            self.errors.fetch_add(1, Ordering::Release);
        }
        ok
    }
}

/// Subscribes to the finished queue and tallies what arrives.
pub struct TestConsumer {
    counters: Arc<Counters>,
    connection: Arc<dyn Connection>,
    task: JoinHandle<()>,
}

impl TestConsumer {
    pub async fn start(broker: &dyn Broker, topology: &Topology) -> Result<Self> {
        let binding = topology.finished_binding();
        let connection = broker.connect().await?;
        connection.declare_exchange(&binding.exchange).await?;
        connection.bind_queue(&binding).await?;
        let subscription = connection.subscribe(&binding.queue).await?;

        let counters = Arc::new(Counters::default());
        let task = tokio::spawn(consume(Arc::clone(&counters), subscription));

        Ok(Self {
            counters,
            connection,
            task,
        })
    }

    pub fn tally(&self) -> Tally {
        Tally {
            consumed: self.counters.consumed.load(Ordering::Acquire),
            errors: self.counters.errors.load(Ordering::Acquire),
            duplicates: self.counters.duplicates.load(Ordering::Acquire),
        }
    }

    /// Zero the counters and forget which values were seen.
    pub fn reset(&self) {
        self.counters.consumed.store(0, Ordering::Release);
        self.counters.errors.store(0, Ordering::Release);
        self.counters.duplicates.store(0, Ordering::Release);
        self.counters.seen.lock().clear();
    }

    /// Resolves after the next message is tallied (or immediately if one was
    /// tallied since the last call).
    pub async fn progressed(&self) {
        self.counters.progress.notified().await;
    }

    /// Close the connection and wait for the consumer task to finish.
    pub async fn close(self) {
        self.connection.close().await;
        if let Err(e) = self.task.await {
            warn!("test consumer task ended abnormally: {e}");
        }
    }
}

async fn consume(counters: Arc<Counters>, mut subscription: Subscription) {
    while let Some(delivery) = subscription.next().await {
        let ok = counters.check(&delivery.payload);
        if let Err(e) = delivery.handle.ack().await {
            warn!(error = %e, "could not acknowledge finished message");
        }
        metrics::harness_outcomes().add(
            1,
            &[KeyValue::new("outcome", if ok { "consumed" } else { "error" })],
        );
        counters.progress.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkItem;

    fn payload(item: &WorkItem) -> Vec<u8> {
        codec::encode(item).unwrap()
    }

    #[test]
    fn signed_items_count_as_consumed() {
        let counters = Counters::default();
        let mut item = WorkItem::new("test.key", "message_1");
        item.sign();
        assert!(counters.check(&payload(&item)));
        assert_eq!(counters.consumed.load(Ordering::Acquire), 1);
        assert_eq!(counters.errors.load(Ordering::Acquire), 0);
    }

    #[test]
    fn tampered_and_unsigned_items_count_as_errors() {
        let counters = Counters::default();
        let mut tampered = WorkItem::new("test.key", "message_1");
        tampered.result = Some("0".repeat(64));
        let unsigned = WorkItem::new("test.key", "message_2");

        assert!(!counters.check(&payload(&tampered)));
        assert!(!counters.check(&payload(&unsigned)));
        assert!(!counters.check(b"{not json"));
        assert_eq!(counters.errors.load(Ordering::Acquire), 3);
        assert_eq!(counters.consumed.load(Ordering::Acquire), 0);
    }

    #[test]
    fn repeated_values_are_flagged() {
        let counters = Counters::default();
        let mut item = WorkItem::new("test.key", "message_1");
        item.sign();
        counters.check(&payload(&item));
        counters.check(&payload(&item));
        assert_eq!(counters.duplicates.load(Ordering::Acquire), 1);
        assert_eq!(counters.consumed.load(Ordering::Acquire), 2);
    }
}
