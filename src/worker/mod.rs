//! Transform workers.
//!
//! Every variant does the same thing with a delivery: decode the work item,
//! sign it, publish the result, then acknowledge the delivery. They differ
//! only in who owns the outbound channel:
//!
//! - [`DirectPublishWorker`]: each worker has its own connection
//! - [`SharedPublisherWorker`]: all workers wait on one shared publisher
//! - [`PooledPublisherWorker`]: workers hand off to a separately sized
//!   [`PublisherPool`](crate::publisher::PublisherPool) without waiting
//!
//! The acknowledgment always follows the publish call, so a crash in between
//! leaves the delivery unacknowledged and the broker redelivers it.

pub mod direct;
pub mod pooled;
pub mod shared;

use std::str::FromStr;
use std::time::Instant;

use opentelemetry::KeyValue;

pub use direct::{DirectPublishFactory, DirectPublishWorker};
pub use pooled::{PooledPublisherFactory, PooledPublisherWorker};
pub use shared::{SharedPublisherFactory, SharedPublisherWorker};

use crate::broker::DeliveryHandle;
use crate::error::{Error, Result};
use crate::telemetry::metrics;

/// The publish strategy a consumer pool runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Direct,
    Shared,
    Pooled,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 3] = [Self::Direct, Self::Shared, Self::Pooled];

    /// Short label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Shared => "shared",
            Self::Pooled => "pooled",
        }
    }

    /// The worker's name on the command line.
    pub fn class_name(self) -> &'static str {
        match self {
            Self::Direct => "PublisherWorker",
            Self::Shared => "SharedPublisherWorker",
            Self::Pooled => "PooledPublisherWorker",
        }
    }
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.class_name())
    }
}

impl FromStr for WorkerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| s == k.class_name() || s.eq_ignore_ascii_case(k.as_str()))
            .ok_or_else(|| Error::Config(format!("Unknown test class: {s}")))
    }
}

/// Acknowledge a delivery once its result has been published, and account
/// for it.
async fn finish(strategy: WorkerKind, handle: DeliveryHandle, started: Instant) -> Result<()> {
    handle.ack().await?;
    let labels = [KeyValue::new("strategy", strategy.as_str())];
    metrics::messages_transformed().add(1, &labels);
    metrics::transform_duration_ms().record(started.elapsed().as_secs_f64() * 1000.0, &labels);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_class_names_and_short_names() {
        assert_eq!("PublisherWorker".parse::<WorkerKind>().unwrap(), WorkerKind::Direct);
        assert_eq!("shared".parse::<WorkerKind>().unwrap(), WorkerKind::Shared);
        assert_eq!("POOLED".parse::<WorkerKind>().unwrap(), WorkerKind::Pooled);
    }

    #[test]
    fn unknown_name_is_a_config_error() {
        let err = "FancyWorker".parse::<WorkerKind>().unwrap_err();
        assert_eq!(err.to_string(), "configuration error: Unknown test class: FancyWorker");
    }

    #[test]
    fn display_round_trips() {
        for kind in WorkerKind::ALL {
            assert_eq!(kind.to_string().parse::<WorkerKind>().unwrap(), kind);
        }
    }
}
