//! Integration tests for telemetry initialization and span helpers.

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    // Using try_init() in the implementation avoids panics if another
    // test already initialized a subscriber.
    let config = queue_pool::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "queue-pool-test".to_string(),
        log_level: "debug".to_string(),
    };
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    let _guard = queue_pool::telemetry::init_telemetry(config);
}

#[test]
fn delivery_span_creates_and_records_outcome() {
    let span = queue_pool::telemetry::delivery::start_delivery_span("direct", 0, 42);
    queue_pool::telemetry::delivery::record_outcome(&span, "published");
}

#[test]
fn metric_instruments_accept_records_without_a_provider() {
    use opentelemetry::KeyValue;
    use queue_pool::telemetry::metrics;

    let labels = [KeyValue::new("strategy", "pooled")];
    metrics::messages_transformed().add(1, &labels);
    metrics::transform_duration_ms().record(1.5, &labels);
    metrics::member_deaths().add(1, &[KeyValue::new("pool", "test")]);
}
