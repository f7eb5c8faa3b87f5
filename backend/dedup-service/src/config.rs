/// Configuration management
///
/// Loaded from the process environment (and a `.env` file when present).
use serde::Deserialize;
use std::time::Duration;

use crate::queue::{OverflowPolicy, QueuePolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    // Database configuration
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    // Ingestion queue; no capacity means unbounded
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub queue_overflow: OverflowPolicy,

    #[serde(default = "default_shutdown_drain_timeout_secs")]
    pub shutdown_drain_timeout_secs: u64,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_database_url() -> String {
    "sqlite://data/dedup.db".to_string()
}

fn default_db_max_connections() -> u32 {
    5
}

fn default_shutdown_drain_timeout_secs() -> u64 {
    5
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Build from explicit key/value pairs, using the same variable names as
    /// the environment (`PORT`, `QUEUE_CAPACITY`, ...).
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        envy::from_iter(pairs.into_iter().map(|(k, v)| (k.into(), v.into())))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn queue_policy(&self) -> QueuePolicy {
        match self.queue_capacity {
            None | Some(0) => QueuePolicy::Unbounded,
            Some(capacity) => QueuePolicy::Bounded {
                capacity,
                overflow: self.queue_overflow,
            },
        }
    }

    pub fn shutdown_drain_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_drain_timeout_secs)
    }
}
