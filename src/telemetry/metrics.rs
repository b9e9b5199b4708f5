//! Metric instrument factories for queue-pool.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"queue-pool"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for queue-pool instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("queue-pool")
}

/// Counter: deliveries handed from a subscription loop to a pool.
/// Labels: `queue`, `result` ("ok" | "rejected").
pub fn deliveries_dispatched() -> Counter<u64> {
    meter()
        .u64_counter("queue_pool.deliveries.dispatched")
        .with_description("Deliveries dispatched into a consumer pool")
        .build()
}

/// Counter: work items signed and published by a transform worker.
/// Labels: `strategy` ("direct" | "shared" | "pooled").
pub fn messages_transformed() -> Counter<u64> {
    meter()
        .u64_counter("queue_pool.messages.transformed")
        .with_description("Work items signed and republished")
        .build()
}

/// Counter: publishes issued by publisher pool members.
/// Labels: `exchange`, `result` ("ok" | "error").
pub fn publishes() -> Counter<u64> {
    meter()
        .u64_counter("queue_pool.publishes")
        .with_description("Publishes issued by publisher pool members")
        .build()
}

/// Counter: pool members that terminated after an error.
/// Labels: `pool`.
pub fn member_deaths() -> Counter<u64> {
    meter()
        .u64_counter("queue_pool.members.terminated")
        .with_description("Pool members terminated by an error")
        .build()
}

/// Counter: pool members rebuilt after an error.
/// Labels: `pool`.
pub fn member_restarts() -> Counter<u64> {
    meter()
        .u64_counter("queue_pool.members.rebuilt")
        .with_description("Pool members rebuilt after an error")
        .build()
}

/// Counter: finished messages checked by the test consumer.
/// Labels: `outcome` ("consumed" | "error").
pub fn harness_outcomes() -> Counter<u64> {
    meter()
        .u64_counter("queue_pool.harness.outcomes")
        .with_description("Finished messages checked by the test consumer")
        .build()
}

/// Histogram: time from delivery to acknowledgment in milliseconds.
/// Labels: `strategy`.
pub fn transform_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("queue_pool.transform.duration_ms")
        .with_description("Delivery to acknowledgment latency in milliseconds")
        .with_unit("ms")
        .build()
}
