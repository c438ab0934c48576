//! Monitor Configuration
//!
//! YAML file plus a handful of environment overrides. Every section falls
//! back to the built-in defaults when omitted.

use std::path::Path;
use std::str::FromStr;

use alloy::primitives::Address;
use serde::Deserialize;
use thiserror::Error;

use crate::analyzer::AnalyzerConfig;
use crate::block_fetcher::DEFAULT_HASH_BATCH_SIZE;
use crate::compliance::ComplianceConfig;
use crate::filter::PYUSD_ADDRESS;
use crate::notifier::WebhookConfig;
use crate::poller::PollerConfig;
use crate::publisher::DEFAULT_CHANNEL;
use crate::retry::RetryPolicy;
use crate::rpc::NodeConfig;
use crate::store::DEFAULT_ALERTS_KEY;

/// Config file used when no path is given
pub const DEFAULT_CONFIG_PATH: &str = "monitor.yaml";

pub const ENV_CONFIG_PATH: &str = "MONITOR_CONFIG";
pub const ENV_RPC_URL: &str = "MONITOR_RPC_URL";
pub const ENV_TOKEN_ADDRESS: &str = "MONITOR_TOKEN_ADDRESS";
pub const ENV_START_BLOCK: &str = "MONITOR_START_BLOCK";
pub const ENV_REDIS_URL: &str = "MONITOR_REDIS_URL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{field}: invalid address {value:?}")]
    InvalidAddress { field: String, value: String },

    #[error("{field}: invalid number {value:?}")]
    InvalidNumber { field: String, value: String },

    #[error("{0}")]
    Invalid(String),
}

/// Redis sinks: alert hash and live channel
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub channel: String,
    pub alerts_key: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            alerts_key: DEFAULT_ALERTS_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub node: NodeConfig,
    /// Token contract whose transactions are monitored
    pub token_address: Address,
    pub poller: PollerConfig,
    pub retry: RetryPolicy,
    /// Individual lookups in flight when falling back to hash-then-fetch
    pub hash_batch_size: usize,
    pub analyzer: AnalyzerConfig,
    pub compliance: ComplianceConfig,
    /// Redis store and live publisher; in-memory store when absent
    pub redis: Option<RedisConfig>,
    pub webhooks: Vec<WebhookConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            token_address: PYUSD_ADDRESS,
            poller: PollerConfig::default(),
            retry: RetryPolicy::default(),
            hash_batch_size: DEFAULT_HASH_BATCH_SIZE,
            analyzer: AnalyzerConfig::default(),
            compliance: ComplianceConfig::default(),
            redis: None,
            webhooks: Vec::new(),
        }
    }
}

impl MonitorConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Load the file if present, otherwise start from defaults, then apply
    /// the process environment
    pub fn load_with_env(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MONITOR_*` overrides using `lookup` to read variables
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_RPC_URL) {
            self.node.url = url;
        }

        if let Some(value) = lookup(ENV_TOKEN_ADDRESS) {
            self.token_address =
                Address::from_str(value.trim()).map_err(|_| ConfigError::InvalidAddress {
                    field: ENV_TOKEN_ADDRESS.to_string(),
                    value: value.clone(),
                })?;
        }

        if let Some(value) = lookup(ENV_START_BLOCK) {
            let block = value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidNumber {
                field: ENV_START_BLOCK.to_string(),
                value: value.clone(),
            })?;
            self.poller.start_block = Some(block);
        }

        if let Some(url) = lookup(ENV_REDIS_URL) {
            self.redis.get_or_insert_with(RedisConfig::default).url = url;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.url.trim().is_empty() {
            return Err(ConfigError::Invalid("node.url must not be empty".to_string()));
        }
        if self.poller.batch_size == 0 {
            return Err(ConfigError::Invalid("poller.batch_size must be at least 1".to_string()));
        }
        if self.poller.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "poller.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.hash_batch_size == 0 {
            return Err(ConfigError::Invalid("hash_batch_size must be at least 1".to_string()));
        }
        if !(self.analyzer.gas_spike_ratio > 0.0) {
            return Err(ConfigError::Invalid(
                "analyzer.gas_spike_ratio must be positive".to_string(),
            ));
        }
        for webhook in &self.webhooks {
            if !webhook.url.starts_with("http://") && !webhook.url.starts_with("https://") {
                return Err(ConfigError::Invalid(format!(
                    "webhook {} has a non-HTTP url {:?}",
                    webhook.name, webhook.url
                )));
            }
        }
        Ok(())
    }
}
