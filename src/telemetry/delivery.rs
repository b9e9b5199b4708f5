//! Delivery processing span helpers.
//!
//! Provides span creation and outcome recording for deliveries flowing
//! through a transform worker.

use tracing::Span;

/// Start a span for one delivery handled by a pool member.
///
/// The `delivery.outcome` field is declared empty and filled by
/// [`record_outcome`].
pub fn start_delivery_span(strategy: &str, member: usize, tag: u64) -> Span {
    tracing::info_span!(
        "delivery.process",
        "delivery.strategy" = strategy,
        "delivery.member" = member,
        "delivery.tag" = tag,
        "delivery.outcome" = tracing::field::Empty,
    )
}

/// Record how processing ended on the given span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("delivery.outcome", outcome);
    span.in_scope(|| {
        tracing::debug!(outcome = outcome, "delivery processed");
    });
}
