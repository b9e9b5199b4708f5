//! Typed configuration from environment variables.
//!
//! Loads once at startup and fails fast on values that do not parse.
//! Everything has a default, so an empty environment is a valid one.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::harness::{RunnerConfig, Topology};
use crate::pool::RestartPolicy;
use crate::publisher::PublisherPool;

#[derive(Debug, Clone)]
pub struct Config {
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub publisher_pool_size: usize,
    pub poll_interval: Duration,
    pub wait_timeout: Duration,
    pub idle_timeout: Duration,
    pub restart: RestartPolicy,
    /// TOML file overriding exchange, queue and routing-key names.
    pub topology: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            otel_endpoint: lookup("OTEL_ENDPOINT"),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            publisher_pool_size: parsed(
                &lookup,
                "QUEUE_POOL_PUBLISHER_POOL_SIZE",
                PublisherPool::DEFAULT_SIZE,
            )?,
            poll_interval: Duration::from_millis(parsed(
                &lookup,
                "QUEUE_POOL_POLL_INTERVAL_MS",
                10,
            )?),
            wait_timeout: Duration::from_secs(parsed(
                &lookup,
                "QUEUE_POOL_WAIT_TIMEOUT_SECS",
                300,
            )?),
            idle_timeout: Duration::from_secs(parsed(
                &lookup,
                "QUEUE_POOL_IDLE_TIMEOUT_SECS",
                30,
            )?),
            restart: parsed(&lookup, "QUEUE_POOL_RESTART", RestartPolicy::Never)?,
            topology: lookup("QUEUE_POOL_TOPOLOGY").map(PathBuf::from),
        })
    }

    /// Runner settings for a consumer pool of `pool_size`, loading the
    /// topology file if one is configured.
    pub fn runner_config(&self, pool_size: usize) -> Result<RunnerConfig> {
        let topology = match &self.topology {
            Some(path) => Topology::load(path)?,
            None => Topology::default(),
        };
        Ok(RunnerConfig {
            pool_size,
            publisher_pool_size: self.publisher_pool_size,
            restart: self.restart,
            poll_interval: self.poll_interval,
            wait_timeout: self.wait_timeout,
            idle_timeout: self.idle_timeout,
            topology,
        })
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}"))),
    }
}
