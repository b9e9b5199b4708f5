//! Exchange, queue and routing-key names for a test run.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::BindingSpec;

pub const START_EXCHANGE: &str = "celluloid.test.start";
pub const START_QUEUE: &str = "celluloid.test.start.queue";
pub const FINISHED_EXCHANGE: &str = "celluloid.test.finished";
pub const FINISHED_QUEUE: &str = "celluloid.test.finished.queue";
pub const ROUTING_KEY: &str = "celluloid.test.key";

/// The two logical channels of a run. One routing key serves both.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Topology {
    pub start_exchange: String,
    pub start_queue: String,
    pub finished_exchange: String,
    pub finished_queue: String,
    pub routing_key: String,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            start_exchange: START_EXCHANGE.to_string(),
            start_queue: START_QUEUE.to_string(),
            finished_exchange: FINISHED_EXCHANGE.to_string(),
            finished_queue: FINISHED_QUEUE.to_string(),
            routing_key: ROUTING_KEY.to_string(),
        }
    }
}

impl Topology {
    /// Load from a TOML file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad topology file {}: {e}", path.display())))
    }

    /// Where the consumer pool reads from.
    pub fn start_binding(&self) -> BindingSpec {
        BindingSpec::new(&self.start_exchange, &self.start_queue, &self.routing_key)
    }

    /// Where the test consumer reads finished items from.
    pub fn finished_binding(&self) -> BindingSpec {
        BindingSpec::new(
            &self.finished_exchange,
            &self.finished_queue,
            &self.routing_key,
        )
    }
}
