//! # queue-pool
//!
//! Pools of message-transforming workers between two topic exchanges, and a
//! harness that measures how each publishing strategy holds up under load.
//!
//! Workers consume from a start queue, stamp each item with an HMAC-SHA256
//! digest of its value and republish it to a finished exchange. The three
//! [`worker::WorkerKind`]s differ only in how that republish happens: over a
//! connection each worker owns, through one shared publisher, or through a
//! small publisher pool.

pub mod broker;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod digest;
pub mod error;
pub mod harness;
pub mod model;
pub mod pool;
pub mod publisher;
pub mod telemetry;
pub mod worker;
