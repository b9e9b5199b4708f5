//! In-process topic broker.
//!
//! Topic exchanges route each published message to every bound queue whose
//! pattern matches the routing key (once per queue). A queue buffers messages
//! until it has a subscriber, then hands them out round-robin. Deliveries
//! stay unacknowledged until their handle is acked; closing the subscribing
//! connection puts them back at the head of the queue flagged `redelivered`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::event::{Event, EventKind};
use super::topic::RoutingPattern;
use super::{Acker, Broker, Connection, Delivery, DeliveryHandle, Subscription};
use crate::error::{Error, Result};
use crate::model::BindingSpec;

/// Point-in-time counters for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Messages routed into the queue.
    pub enqueued: u64,
    /// Deliveries handed to subscribers, redeliveries included.
    pub delivered: u64,
    pub acked: u64,
    /// Waiting for a subscriber.
    pub pending: usize,
    /// Delivered but not yet acknowledged.
    pub unacked: usize,
}

struct Message {
    exchange: String,
    routing_key: String,
    payload: Vec<u8>,
    redelivered: bool,
}

struct Subscriber {
    connection: Uuid,
    acker: Arc<dyn Acker>,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct QueueState {
    backlog: VecDeque<Message>,
    subscribers: Vec<Subscriber>,
    cursor: usize,
    unacked: HashMap<u64, (Uuid, Message)>,
    enqueued: u64,
    delivered: u64,
    acked: u64,
}

impl QueueState {
    fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.enqueued,
            delivered: self.delivered,
            acked: self.acked,
            pending: self.backlog.len(),
            unacked: self.unacked.len(),
        }
    }

    /// Hand out as much of the backlog as there are live subscribers for.
    fn pump(&mut self, name: &str, next_tag: &AtomicU64, events: &mut Vec<EventKind>) {
        while let Some(msg) = self.backlog.pop_front() {
            self.subscribers.retain(|s| !s.tx.is_closed());
            if self.subscribers.is_empty() {
                self.backlog.push_front(msg);
                return;
            }

            let idx = self.cursor % self.subscribers.len();
            self.cursor = self.cursor.wrapping_add(1);
            let sub = &self.subscribers[idx];

            let tag = next_tag.fetch_add(1, Ordering::Relaxed);
            let delivery = Delivery {
                exchange: msg.exchange.clone(),
                routing_key: msg.routing_key.clone(),
                payload: msg.payload.clone(),
                redelivered: msg.redelivered,
                delivered_at: Utc::now(),
                handle: DeliveryHandle::new(tag, Arc::clone(&sub.acker)),
            };

            match sub.tx.send(delivery) {
                Ok(()) => {
                    self.delivered += 1;
                    events.push(EventKind::Delivered {
                        queue: name.to_string(),
                        tag,
                        redelivered: msg.redelivered,
                    });
                    self.unacked.insert(tag, (sub.connection, msg));
                }
                // Receiver went away between the retain and the send; the
                // next iteration drops it.
                Err(_) => self.backlog.push_front(msg),
            }
        }
    }
}

struct Binding {
    pattern: RoutingPattern,
    queue: String,
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, Vec<Binding>>,
    queues: HashMap<String, QueueState>,
    open: HashSet<Uuid>,
    rejecting: HashSet<String>,
    journal: Vec<Event>,
}

struct Inner {
    state: Mutex<State>,
    journal_enabled: bool,
    next_tag: AtomicU64,
    next_seq: AtomicU64,
    connections_opened: AtomicU64,
}

impl Inner {
    fn record(&self, state: &mut State, kinds: Vec<EventKind>) {
        if !self.journal_enabled {
            return;
        }
        for kind in kinds {
            state.journal.push(Event {
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                timestamp: Utc::now(),
                kind,
            });
        }
    }

    fn ensure_open(state: &State, connection: Uuid) -> Result<()> {
        if state.open.contains(&connection) {
            Ok(())
        } else {
            Err(Error::ConnectionClosed(connection))
        }
    }

    fn open_connection(&self) -> Uuid {
        let id = Uuid::new_v4();
        let mut state = self.state.lock();
        state.open.insert(id);
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        self.record(
            &mut state,
            vec![EventKind::ConnectionOpened { connection: id }],
        );
        id
    }

    fn declare_exchange(&self, connection: Uuid, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::ensure_open(&state, connection)?;
        state.exchanges.entry(name.to_string()).or_default();
        Ok(())
    }

    fn bind_queue(&self, connection: Uuid, binding: &BindingSpec) -> Result<()> {
        let mut state = self.state.lock();
        Self::ensure_open(&state, connection)?;

        let bindings = state
            .exchanges
            .get_mut(&binding.exchange)
            .ok_or_else(|| Error::UnknownExchange(binding.exchange.clone()))?;
        let exists = bindings
            .iter()
            .any(|b| b.queue == binding.queue && b.pattern.as_str() == binding.routing_key);
        if !exists {
            bindings.push(Binding {
                pattern: RoutingPattern::new(binding.routing_key.clone()),
                queue: binding.queue.clone(),
            });
        }
        state.queues.entry(binding.queue.clone()).or_default();

        self.record(
            &mut state,
            vec![EventKind::QueueBound {
                exchange: binding.exchange.clone(),
                queue: binding.queue.clone(),
                routing_key: binding.routing_key.clone(),
            }],
        );
        Ok(())
    }

    fn publish(
        &self,
        connection: Uuid,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        Self::ensure_open(&state, connection)?;
        if state.rejecting.contains(exchange) {
            return Err(Error::Broker(format!(
                "publish to exchange '{exchange}' rejected"
            )));
        }

        let bindings = state
            .exchanges
            .get(exchange)
            .ok_or_else(|| Error::UnknownExchange(exchange.to_string()))?;
        let mut targets: Vec<String> = bindings
            .iter()
            .filter(|b| b.pattern.matches(routing_key))
            .map(|b| b.queue.clone())
            .collect();
        targets.sort();
        targets.dedup();

        let mut events = vec![EventKind::Published {
            connection,
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            routed_to: targets.len(),
        }];

        for name in &targets {
            if let Some(queue) = state.queues.get_mut(name) {
                queue.enqueued += 1;
                queue.backlog.push_back(Message {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    payload: payload.clone(),
                    redelivered: false,
                });
                queue.pump(name, &self.next_tag, &mut events);
            }
        }

        if targets.is_empty() {
            debug!(exchange, routing_key, "unroutable message dropped");
        }

        self.record(&mut state, events);
        Ok(())
    }

    fn subscribe(self: &Arc<Self>, connection: Uuid, queue_name: &str) -> Result<Subscription> {
        let mut state = self.state.lock();
        Self::ensure_open(&state, connection)?;

        let queue = state
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| Error::UnknownQueue(queue_name.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let acker: Arc<dyn Acker> = Arc::new(MemoryAcker {
            inner: Arc::downgrade(self),
            connection,
            queue: queue_name.to_string(),
        });
        queue.subscribers.push(Subscriber {
            connection,
            acker,
            tx,
        });

        let mut events = Vec::new();
        queue.pump(queue_name, &self.next_tag, &mut events);
        self.record(&mut state, events);

        Ok(Subscription::new(queue_name, rx))
    }

    fn ack(&self, connection: Uuid, queue_name: &str, tag: u64) -> Result<()> {
        let mut state = self.state.lock();
        Self::ensure_open(&state, connection)?;

        let queue = state
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| Error::UnknownQueue(queue_name.to_string()))?;
        if queue.unacked.remove(&tag).is_none() {
            return Err(Error::Broker(format!(
                "unknown delivery tag {tag} on queue '{queue_name}'"
            )));
        }
        queue.acked += 1;

        self.record(
            &mut state,
            vec![EventKind::Acked {
                connection,
                queue: queue_name.to_string(),
                tag,
            }],
        );
        Ok(())
    }

    fn close(&self, connection: Uuid) {
        let mut state = self.state.lock();
        if !state.open.remove(&connection) {
            return;
        }

        let mut requeued = 0;
        let mut events = Vec::new();
        for (name, queue) in state.queues.iter_mut() {
            queue.subscribers.retain(|s| s.connection != connection);

            let mut tags: Vec<u64> = queue
                .unacked
                .iter()
                .filter(|(_, (owner, _))| *owner == connection)
                .map(|(tag, _)| *tag)
                .collect();
            tags.sort_unstable();
            // Reverse so the oldest delivery ends up first in line.
            for tag in tags.into_iter().rev() {
                if let Some((_, mut msg)) = queue.unacked.remove(&tag) {
                    msg.redelivered = true;
                    queue.backlog.push_front(msg);
                    requeued += 1;
                }
            }
            queue.pump(name, &self.next_tag, &mut events);
        }

        let mut kinds = vec![EventKind::ConnectionClosed {
            connection,
            requeued,
        }];
        kinds.append(&mut events);
        self.record(&mut state, kinds);
        debug!(%connection, requeued, "connection closed");
    }
}

// ---------------------------------------------------------------------------
// Public handle
// ---------------------------------------------------------------------------

/// An in-process topic broker. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::build(false)
    }

    /// A broker that records every [`Event`] for later inspection.
    pub fn with_journal() -> Self {
        Self::build(true)
    }

    fn build(journal_enabled: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                journal_enabled,
                next_tag: AtomicU64::new(1),
                next_seq: AtomicU64::new(1),
                connections_opened: AtomicU64::new(0),
            }),
        }
    }

    /// Recorded events, oldest first. Empty unless built [`with_journal`](Self::with_journal).
    pub fn journal(&self) -> Vec<Event> {
        self.inner.state.lock().journal.clone()
    }

    pub fn queue_stats(&self, queue: &str) -> Option<QueueStats> {
        self.inner.state.lock().queues.get(queue).map(QueueState::stats)
    }

    pub fn open_connections(&self) -> usize {
        self.inner.state.lock().open.len()
    }

    /// Connections opened over the broker's lifetime.
    pub fn connections_opened(&self) -> u64 {
        self.inner.connections_opened.load(Ordering::Relaxed)
    }

    /// Make every publish to `exchange` fail with a broker error.
    pub fn reject_publishes_to(&self, exchange: &str) {
        self.inner.state.lock().rejecting.insert(exchange.to_string());
    }

    pub fn accept_publishes_to(&self, exchange: &str) {
        self.inner.state.lock().rejecting.remove(exchange);
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn Connection>> {
        let id = self.inner.open_connection();
        Ok(Arc::new(MemoryConnection {
            inner: Arc::clone(&self.inner),
            id,
        }))
    }
}

struct MemoryConnection {
    inner: Arc<Inner>,
    id: Uuid,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> Uuid {
        self.id
    }

    fn is_open(&self) -> bool {
        self.inner.state.lock().open.contains(&self.id)
    }

    async fn declare_exchange(&self, name: &str) -> Result<()> {
        self.inner.declare_exchange(self.id, name)
    }

    async fn bind_queue(&self, binding: &BindingSpec) -> Result<()> {
        self.inner.bind_queue(self.id, binding)
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: Vec<u8>) -> Result<()> {
        self.inner.publish(self.id, exchange, routing_key, payload)
    }

    async fn subscribe(&self, queue: &str) -> Result<Subscription> {
        self.inner.subscribe(self.id, queue)
    }

    async fn close(&self) {
        self.inner.close(self.id);
    }
}

struct MemoryAcker {
    inner: Weak<Inner>,
    connection: Uuid,
    queue: String,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self, tag: u64) -> Result<()> {
        let inner = self
            .inner
            .upgrade()
            .ok_or_else(|| Error::Broker("broker has shut down".to_string()))?;
        inner.ack(self.connection, &self.queue, tag)
    }
}
