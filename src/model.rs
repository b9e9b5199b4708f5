//! Core data model.
//!
//! A work item is the unit flowing through the pools: a `key`/`value` pair
//! that a transform worker signs exactly once by attaching `result`.

use serde::{Deserialize, Serialize};

use crate::digest::hmac_sha256_hex;

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A message payload travelling from the start topic to the finished topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// HMAC secret.
    pub key: String,

    /// HMAC message.
    pub value: String,

    /// Lowercase hex HMAC-SHA256 of `value` keyed by `key`. Absent until a
    /// transform worker has processed the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    /// Any other fields on the wire. Carried through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl WorkItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            result: None,
            extra: serde_json::Map::new(),
        }
    }

    /// The digest this item should carry.
    pub fn expected_result(&self) -> String {
        hmac_sha256_hex(&self.key, &self.value)
    }

    /// Compute and attach `result`, replacing any previous value.
    pub fn sign(&mut self) {
        self.result = Some(self.expected_result());
    }

    /// True iff `result` is present and matches the recomputed digest.
    pub fn verify(&self) -> bool {
        self.result
            .as_deref()
            .is_some_and(|r| r == self.expected_result())
    }
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// How a queue is attached to a topic exchange. Fixed at pool construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingSpec {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

impl BindingSpec {
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_key: routing_key.into(),
        }
    }
}

impl std::fmt::Display for BindingSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -[{}]-> {}",
            self.exchange, self.routing_key, self.queue
        )
    }
}
