//! End-to-end runs of every worker variant through the in-process broker.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use queue_pool::broker::event::EventKind;
use queue_pool::broker::{Broker, Exchange, MemoryBroker};
use queue_pool::codec;
use queue_pool::error::Error;
use queue_pool::harness::topology::{FINISHED_EXCHANGE, FINISHED_QUEUE, START_QUEUE};
use queue_pool::harness::{Runner, RunnerConfig, TestConsumer, TestPublisher, Topology};
use queue_pool::model::WorkItem;
use queue_pool::worker::WorkerKind;

fn journaled() -> (MemoryBroker, Arc<dyn Broker>) {
    let memory = MemoryBroker::with_journal();
    let broker: Arc<dyn Broker> = Arc::new(memory.clone());
    (memory, broker)
}

fn config(pool_size: usize) -> RunnerConfig {
    RunnerConfig {
        wait_timeout: Duration::from_secs(30),
        idle_timeout: Duration::from_secs(10),
        ..RunnerConfig::new(pool_size)
    }
}

/// Connections that published to the finished exchange.
fn finished_publishers(memory: &MemoryBroker) -> HashSet<uuid::Uuid> {
    memory
        .journal()
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::Published {
                connection,
                exchange,
                ..
            } if exchange == FINISHED_EXCHANGE => Some(connection),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// One run per variant
// ---------------------------------------------------------------------------

#[tokio::test]
async fn direct_single_message_round_trip() {
    let (memory, broker) = journaled();
    let runner = Runner::new(broker, WorkerKind::Direct, config(2))
        .await
        .unwrap();

    let report = runner.run_test(1).await.unwrap();
    runner.shutdown().await;

    assert_eq!(report.successful, 1);
    assert_eq!(report.errors, 0);
    assert_eq!(report.total_published, 1);
    assert!(report.is_clean());
    assert_eq!(memory.queue_stats(START_QUEUE).unwrap().acked, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_variant_publishes_over_one_connection() {
    let (memory, broker) = journaled();
    let runner = Runner::new(broker, WorkerKind::Shared, config(5))
        .await
        .unwrap();
    assert_eq!(runner.publisher_pool_size(), Some(1));

    let report = runner.run_test(100).await.unwrap();
    runner.shutdown().await;

    assert_eq!(report.successful, 100);
    assert_eq!(report.duplicates, 0);
    assert_eq!(finished_publishers(&memory).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pooled_variant_publishes_over_at_most_pool_size_connections() {
    let (memory, broker) = journaled();
    let runner = Runner::new(broker, WorkerKind::Pooled, config(5))
        .await
        .unwrap();
    assert_eq!(runner.publisher_pool_size(), Some(2));

    let report = runner.run_test(100).await.unwrap();
    runner.shutdown().await;

    assert_eq!(report.successful, 100);
    let publishers = finished_publishers(&memory);
    assert!(!publishers.is_empty() && publishers.len() <= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_variant_accounts_for_every_message() {
    for kind in WorkerKind::ALL {
        for pool_size in [2, 5, 20] {
            let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
            let runner = Runner::new(broker, kind, config(pool_size)).await.unwrap();
            let report = runner.run_test(200).await.unwrap();
            runner.shutdown().await;

            assert_eq!(report.total_consumed(), 200, "{kind} x {pool_size}");
            assert_eq!(report.duplicates, 0, "{kind} x {pool_size}");
            assert!(report.is_clean(), "{kind} x {pool_size}");
        }
    }
}

#[tokio::test]
async fn consecutive_runs_start_from_zero() {
    let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
    let runner = Runner::new(broker, WorkerKind::Direct, config(3))
        .await
        .unwrap();

    let first = runner.run_test(20).await.unwrap();
    let second = runner.run_test(20).await.unwrap();
    runner.shutdown().await;

    assert_eq!(first.successful, 20);
    assert_eq!(second.successful, 20);
    assert_eq!(second.duplicates, 0);
}

// ---------------------------------------------------------------------------
// Acknowledgment ordering
// ---------------------------------------------------------------------------

/// At every point in the journal, acks on the start queue never outnumber
/// publishes to the finished exchange.
fn assert_acks_follow_publishes(memory: &MemoryBroker) {
    let mut published = 0usize;
    let mut acked = 0usize;
    for event in memory.journal() {
        match event.kind {
            EventKind::Published { exchange, .. } if exchange == FINISHED_EXCHANGE => {
                published += 1
            }
            EventKind::Acked { queue, .. } if queue == START_QUEUE => {
                acked += 1;
                assert!(acked <= published, "ack #{acked} before its publish");
            }
            _ => {}
        }
    }
    assert_eq!(acked, published);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn waiting_variants_ack_only_after_publishing() {
    for kind in [WorkerKind::Direct, WorkerKind::Shared] {
        let (memory, broker) = journaled();
        let runner = Runner::new(broker, kind, config(4)).await.unwrap();
        runner.run_test(50).await.unwrap();
        runner.shutdown().await;
        assert_acks_follow_publishes(&memory);
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tampered_result_is_counted_as_an_error() {
    let broker = MemoryBroker::new();
    let topology = Topology::default();
    let consumer = TestConsumer::start(&broker, &topology).await.unwrap();

    let connection = broker.connect().await.unwrap();
    let finished = Exchange::declare(connection, FINISHED_EXCHANGE)
        .await
        .unwrap();

    let mut good = TestPublisher::message(1);
    good.sign();
    let mut tampered = TestPublisher::message(2);
    tampered.sign();
    tampered.result = Some("f".repeat(64));

    for item in [&good, &tampered] {
        finished
            .publish(codec::encode(item).unwrap(), &topology.routing_key)
            .await
            .unwrap();
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while consumer.tally().accounted() < 2 {
            consumer.progressed().await;
        }
    })
    .await
    .unwrap();

    let tally = consumer.tally();
    assert_eq!((tally.consumed, tally.errors), (1, 1));

    consumer.reset();
    assert_eq!(consumer.tally().accounted(), 0);
    consumer.close().await;
}

#[tokio::test]
async fn extra_fields_survive_the_round_trip() {
    let (memory, broker) = journaled();
    let runner = Runner::new(Arc::clone(&broker), WorkerKind::Direct, config(2))
        .await
        .unwrap();
    let topology = Topology::default();

    // Take the finished queue's output directly.
    let connection = broker.connect().await.unwrap();
    connection
        .bind_queue(&topology.finished_binding())
        .await
        .unwrap();
    let mut finished = connection.subscribe(FINISHED_QUEUE).await.unwrap();

    let publisher = TestPublisher::connect(broker.as_ref(), &topology)
        .await
        .unwrap();
    let mut item = WorkItem::new("k", "v");
    item.extra
        .insert("trace".to_string(), serde_json::json!({"hop": 1}));
    publisher
        .publish_raw(codec::encode(&item).unwrap(), &topology.routing_key)
        .await
        .unwrap();

    let delivery = tokio::time::timeout(Duration::from_secs(5), finished.next())
        .await
        .unwrap()
        .unwrap();
    let out = codec::decode(&delivery.payload).unwrap();
    assert_eq!(out.extra["trace"], serde_json::json!({"hop": 1}));
    assert!(out.verify());
    delivery.handle.ack().await.unwrap();

    publisher.close().await;
    connection.close().await;
    runner.shutdown().await;
    assert_eq!(memory.open_connections(), 0);
}

// ---------------------------------------------------------------------------
// Failure modes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dead_workers_strand_messages_until_the_idle_timeout() {
    for kind in WorkerKind::ALL {
        let memory = MemoryBroker::new();
        let broker: Arc<dyn Broker> = Arc::new(memory.clone());
        let runner = Runner::new(
            broker,
            kind,
            RunnerConfig {
                idle_timeout: Duration::from_millis(200),
                ..config(2)
            },
        )
        .await
        .unwrap();

        memory.reject_publishes_to(FINISHED_EXCHANGE);
        let err = runner.run_test(10).await.unwrap_err();
        assert!(
            matches!(
                err,
                Error::MessagesLost {
                    expected: 10,
                    accounted: 0,
                    ..
                }
            ),
            "{kind}: {err}"
        );
        // Pooled workers ack once the hand-off is queued, so they can outlive
        // their publishers.
        if kind != WorkerKind::Pooled {
            assert!(runner.live_workers() < 2, "{kind}");
        }

        runner.shutdown().await;
        // Everything the workers never acknowledged is back on the queue.
        let stats = memory.queue_stats(START_QUEUE).unwrap();
        assert_eq!(stats.unacked, 0, "{kind}");
        assert_eq!(stats.acked + stats.pending as u64, 10, "{kind}");
    }
}

#[tokio::test]
async fn wait_deadline_reports_a_timeout() {
    let memory = MemoryBroker::new();
    let broker: Arc<dyn Broker> = Arc::new(memory.clone());
    let runner = Runner::new(
        broker,
        WorkerKind::Direct,
        RunnerConfig {
            wait_timeout: Duration::ZERO,
            ..config(2)
        },
    )
    .await
    .unwrap();

    memory.reject_publishes_to(FINISHED_EXCHANGE);
    let err = runner.run_test(5).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { expected: 5, .. }), "{err}");
    runner.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_every_connection() {
    for kind in WorkerKind::ALL {
        let memory = MemoryBroker::new();
        let broker: Arc<dyn Broker> = Arc::new(memory.clone());
        let runner = Runner::new(broker, kind, config(3)).await.unwrap();
        runner.run_test(10).await.unwrap();
        assert!(memory.open_connections() > 0);
        runner.shutdown().await;
        assert_eq!(memory.open_connections(), 0, "{kind}");
    }
}
