//! End-to-end harness: publish numbered work items to the start topic, let a
//! consumer pool sign them, and check every one that arrives on the finished
//! topic.

pub mod consumer;
pub mod publisher;
pub mod report;
pub mod runner;
pub mod topology;

pub use consumer::{TestConsumer, Tally};
pub use publisher::TestPublisher;
pub use report::RunReport;
pub use runner::{Runner, RunnerConfig};
pub use topology::Topology;

/// HMAC key carried by every test message.
pub const TEST_KEY: &str = "test.key";
