//! Fixed-size actor pools.
//!
//! Each member owns one actor and a private mailbox it drains strictly in
//! order, so a member never handles two messages at once. [`Pool::cast`]
//! enqueues without waiting on the actor and picks the least-busy live
//! member, rotating the starting point so ties spread round-robin.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::telemetry::metrics;

/// A unit of work with private state and a sequential inbox.
#[async_trait]
pub trait Actor: Send + 'static {
    type Msg: Send + 'static;

    /// Handle one message. An error ends this actor; what happens next is
    /// up to the pool's [`RestartPolicy`].
    async fn handle(&mut self, msg: Self::Msg) -> Result<()>;

    /// Teardown hook, run once when the actor stops for any reason.
    async fn stopped(&mut self) {}
}

/// Builds the actor for a pool member.
#[async_trait]
pub trait ActorFactory: Send + Sync + 'static {
    type Actor: Actor;

    async fn build(&self, member: usize) -> Result<Self::Actor>;
}

/// What a member does after its actor returns an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// The member terminates and anything left in its mailbox is lost.
    /// The pool keeps running with fewer members.
    #[default]
    Never,
    /// The member rebuilds its actor from the factory and keeps draining
    /// the same mailbox.
    Rebuild,
}

impl FromStr for RestartPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "rebuild" => Ok(Self::Rebuild),
            other => Err(Error::Config(format!(
                "unknown restart policy '{other}' (expected never|rebuild)"
            ))),
        }
    }
}

struct Member<M> {
    tx: Mutex<Option<mpsc::UnboundedSender<M>>>,
    pending: Arc<AtomicUsize>,
    alive: Arc<AtomicBool>,
}

/// A fixed set of actors of one kind.
pub struct Pool<A: Actor> {
    name: String,
    members: Vec<Member<A::Msg>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cursor: AtomicUsize,
    restarts: Arc<AtomicU64>,
}

impl<A: Actor> Pool<A> {
    /// Build `size` actors via `factory` and start one task per member.
    pub async fn spawn<F>(
        name: impl Into<String>,
        size: usize,
        factory: F,
        policy: RestartPolicy,
    ) -> Result<Self>
    where
        F: ActorFactory<Actor = A>,
    {
        let name = name.into();
        if size == 0 {
            return Err(Error::Config(format!(
                "pool '{name}' needs at least one member"
            )));
        }

        let factory = Arc::new(factory);
        let restarts = Arc::new(AtomicU64::new(0));
        let mut members = Vec::with_capacity(size);
        let mut tasks = Vec::with_capacity(size);

        for index in 0..size {
            let actor = factory.build(index).await?;
            let (tx, rx) = mpsc::unbounded_channel();
            let pending = Arc::new(AtomicUsize::new(0));
            let alive = Arc::new(AtomicBool::new(true));

            let slot = MemberSlot {
                pool: name.clone(),
                index,
                policy,
                factory: Arc::clone(&factory),
                pending: Arc::clone(&pending),
                alive: Arc::clone(&alive),
                restarts: Arc::clone(&restarts),
            };
            tasks.push(tokio::spawn(slot.run(actor, rx)));
            members.push(Member {
                tx: Mutex::new(Some(tx)),
                pending,
                alive,
            });
        }

        info!(pool = %name, size, ?policy, "pool started");

        Ok(Self {
            name,
            members,
            tasks: Mutex::new(tasks),
            cursor: AtomicUsize::new(0),
            restarts,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured member count, dead members included.
    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn live_members(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.alive.load(Ordering::Acquire))
            .count()
    }

    /// Messages queued or in progress across all members.
    pub fn pending(&self) -> usize {
        self.members
            .iter()
            .map(|m| m.pending.load(Ordering::Relaxed))
            .sum()
    }

    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Enqueue `msg` on the least-busy live member. Never waits for the actor.
    pub fn cast(&self, mut msg: A::Msg) -> Result<()> {
        let n = self.members.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);

        loop {
            let mut best: Option<(usize, usize)> = None;
            for offset in 0..n {
                let i = (start + offset) % n;
                let member = &self.members[i];
                if !member.alive.load(Ordering::Acquire) {
                    continue;
                }
                let load = member.pending.load(Ordering::Relaxed);
                if best.is_none_or(|(_, best_load)| load < best_load) {
                    best = Some((i, load));
                }
            }

            let Some((i, _)) = best else {
                return Err(Error::PoolExhausted(self.name.clone()));
            };
            let member = &self.members[i];
            let guard = member.tx.lock();
            let Some(tx) = guard.as_ref() else {
                return Err(Error::MailboxClosed);
            };

            member.pending.fetch_add(1, Ordering::Relaxed);
            match tx.send(msg) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    // The member's task is gone without having flagged itself.
                    member.pending.fetch_sub(1, Ordering::Relaxed);
                    member.alive.store(false, Ordering::Release);
                    msg = returned;
                }
            }
        }
    }

    /// Send a message carrying a reply channel and wait for the reply.
    pub async fn call<R, F>(&self, make: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(oneshot::Sender<R>) -> A::Msg,
    {
        let (tx, rx) = oneshot::channel();
        self.cast(make(tx))?;
        rx.await.map_err(|_| Error::MailboxClosed)
    }

    /// Close every mailbox, let members drain what they already hold, and
    /// wait for their teardown hooks. Later casts fail with `MailboxClosed`.
    pub async fn shutdown(&self) {
        for member in &self.members {
            member.tx.lock().take();
        }
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(pool = %self.name, "member task ended abnormally: {e}");
            }
        }
        debug!(pool = %self.name, "pool stopped");
    }
}

/// Everything a member task needs besides its actor and mailbox.
struct MemberSlot<F: ActorFactory> {
    pool: String,
    index: usize,
    policy: RestartPolicy,
    factory: Arc<F>,
    pending: Arc<AtomicUsize>,
    alive: Arc<AtomicBool>,
    restarts: Arc<AtomicU64>,
}

impl<F: ActorFactory> MemberSlot<F> {
    async fn run(
        self,
        mut actor: F::Actor,
        mut rx: mpsc::UnboundedReceiver<<F::Actor as Actor>::Msg>,
    ) {
        while let Some(msg) = rx.recv().await {
            let result = actor.handle(msg).await;
            self.pending.fetch_sub(1, Ordering::Relaxed);

            let Err(e) = result else { continue };
            let labels = [KeyValue::new("pool", self.pool.clone())];

            if self.policy == RestartPolicy::Rebuild {
                match self.factory.build(self.index).await {
                    Ok(fresh) => {
                        warn!(pool = %self.pool, member = self.index, error = %e, "pool member failed, rebuilt");
                        actor.stopped().await;
                        actor = fresh;
                        self.restarts.fetch_add(1, Ordering::Relaxed);
                        metrics::member_restarts().add(1, &labels);
                        continue;
                    }
                    Err(rebuild) => {
                        error!(pool = %self.pool, member = self.index, error = %rebuild, "pool member could not be rebuilt");
                    }
                }
            }

            error!(
                pool = %self.pool,
                member = self.index,
                error = %e,
                lost = rx.len(),
                "pool member terminated"
            );
            self.alive.store(false, Ordering::Release);
            metrics::member_deaths().add(1, &labels);
            rx.close();
            actor.stopped().await;
            return;
        }

        actor.stopped().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Records which member handled each message; fails on negative input.
    struct Recorder {
        member: usize,
        seen: Arc<Mutex<Vec<(usize, i64)>>>,
        stopped: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Actor for Recorder {
        type Msg = i64;

        async fn handle(&mut self, msg: i64) -> Result<()> {
            if msg < 0 {
                return Err(Error::Other(format!("refusing {msg}")));
            }
            self.seen.lock().push((self.member, msg));
            Ok(())
        }

        async fn stopped(&mut self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecorderFactory {
        seen: Arc<Mutex<Vec<(usize, i64)>>>,
        stopped: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ActorFactory for RecorderFactory {
        type Actor = Recorder;

        async fn build(&self, member: usize) -> Result<Recorder> {
            Ok(Recorder {
                member,
                seen: Arc::clone(&self.seen),
                stopped: Arc::clone(&self.stopped),
            })
        }
    }

    #[tokio::test]
    async fn zero_sized_pool_is_rejected() {
        let err = Pool::spawn("empty", 0, RecorderFactory::default(), RestartPolicy::Never)
            .await
            .err()
            .expect("size 0 must fail");
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn work_spreads_across_members() {
        let factory = RecorderFactory::default();
        let seen = Arc::clone(&factory.seen);
        let pool = Pool::spawn("spread", 3, factory, RestartPolicy::Never)
            .await
            .unwrap();

        for i in 0..30 {
            pool.cast(i).unwrap();
        }
        pool.shutdown().await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 30);
        let mut members: Vec<usize> = seen.iter().map(|(m, _)| *m).collect();
        members.sort_unstable();
        members.dedup();
        assert_eq!(members, [0, 1, 2]);
    }

    #[tokio::test]
    async fn each_member_handles_its_messages_in_order() {
        let factory = RecorderFactory::default();
        let seen = Arc::clone(&factory.seen);
        let pool = Pool::spawn("ordered", 2, factory, RestartPolicy::Never)
            .await
            .unwrap();
        for i in 0..100 {
            pool.cast(i).unwrap();
        }
        pool.shutdown().await;

        let seen = seen.lock();
        for member in 0..2 {
            let mine: Vec<i64> = seen
                .iter()
                .filter(|(m, _)| *m == member)
                .map(|(_, v)| *v)
                .collect();
            assert!(mine.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[tokio::test]
    async fn failing_member_is_not_replaced() {
        let factory = RecorderFactory::default();
        let stopped = Arc::clone(&factory.stopped);
        let pool = Pool::spawn("fragile", 2, factory, RestartPolicy::Never)
            .await
            .unwrap();

        pool.cast(-1).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while stopped.load(Ordering::SeqCst) != 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("member should die");

        assert_eq!(pool.live_members(), 1);
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.restarts(), 0);

        // The survivor still takes work.
        pool.cast(7).unwrap();
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn exhausted_pool_rejects_casts() {
        let pool = Pool::spawn("doomed", 1, RecorderFactory::default(), RestartPolicy::Never)
            .await
            .unwrap();
        pool.cast(-1).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while pool.live_members() != 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(matches!(pool.cast(1), Err(Error::PoolExhausted(_))));
    }

    #[tokio::test]
    async fn rebuild_policy_keeps_members_alive() {
        let factory = RecorderFactory::default();
        let seen = Arc::clone(&factory.seen);
        let pool = Pool::spawn("sturdy", 1, factory, RestartPolicy::Rebuild)
            .await
            .unwrap();

        pool.cast(-1).unwrap();
        pool.cast(5).unwrap();
        pool.shutdown().await;

        assert_eq!(pool.restarts(), 1);
        assert_eq!(pool.live_members(), 1);
        assert_eq!(*seen.lock(), vec![(0, 5)]);
    }

    #[tokio::test]
    async fn cast_after_shutdown_fails() {
        let pool = Pool::spawn("closed", 1, RecorderFactory::default(), RestartPolicy::Never)
            .await
            .unwrap();
        pool.shutdown().await;
        assert!(matches!(pool.cast(1), Err(Error::MailboxClosed)));
    }

    #[derive(Default)]
    struct EchoFactory;

    struct Echo;

    #[async_trait]
    impl Actor for Echo {
        type Msg = (u32, oneshot::Sender<u32>);

        async fn handle(&mut self, msg: Self::Msg) -> Result<()> {
            let (n, reply) = msg;
            let _ = reply.send(n * 2);
            Ok(())
        }
    }

    #[async_trait]
    impl ActorFactory for EchoFactory {
        type Actor = Echo;

        async fn build(&self, _member: usize) -> Result<Echo> {
            Ok(Echo)
        }
    }

    #[tokio::test]
    async fn call_waits_for_reply() {
        let pool = Pool::spawn("echo", 2, EchoFactory, RestartPolicy::Never)
            .await
            .unwrap();
        let doubled = pool.call(|reply| (21, reply)).await.unwrap();
        assert_eq!(doubled, 42);
        pool.shutdown().await;
    }
}
