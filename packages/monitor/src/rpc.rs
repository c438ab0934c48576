//! Node RPC Module
//!
//! Connection to the blockchain node and the narrow RPC surface the monitor
//! consumes. Responses are returned as raw JSON so every caller validates the
//! shape it depends on.

use std::borrow::Cow;
use std::path::Path;
use std::time::Duration;

use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::transports::BoxTransport;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::decoder::parse_quantity;

/// Default node endpoint
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// Maximum number of connection attempts before startup is considered fatal
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Initial backoff delay for reconnection
pub const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff delay for reconnection
pub const MAX_BACKOFF_MS: u64 = 30000;

/// Errors surfaced by the node RPC layer
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected response to {method}: {reason}")]
    Malformed { method: String, reason: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("IPC socket not found at path: {0}")]
    SocketNotFound(String),

    #[error("Max reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

/// The RPC calls the monitor makes against a node
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Current head block number
    async fn head_block_number(&self) -> Result<u64, RpcError>;

    /// Block with full transaction objects, `None` if the node has no such block
    async fn block_with_transactions(&self, number: u64) -> Result<Option<Value>, RpcError>;

    /// Block with transaction hashes only
    async fn block_hashes_only(&self, number: u64) -> Result<Option<Value>, RpcError>;

    /// Single transaction lookup
    async fn transaction_by_hash(&self, hash: &str) -> Result<Option<Value>, RpcError>;

    /// Arbitrary JSON-RPC call (trace endpoints)
    async fn send_raw(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

/// Configuration for the node connection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// http(s)://, ws(s):// URL or a filesystem path to an IPC socket
    pub url: String,
    /// Maximum connection attempts at startup
    pub max_reconnect_attempts: u32,
    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RPC_URL.to_string(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
        }
    }
}

impl NodeConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Calculate backoff delay for a given attempt number
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_backoff_ms * 2u64.pow(attempt.min(10));
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }

    /// Whether the endpoint is a local IPC socket rather than a URL
    pub fn is_ipc(&self) -> bool {
        !self.url.contains("://")
    }
}

/// Expand ~ to home directory in path
pub fn expand_path(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return path.replacen("~", &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

/// Node connection manager with startup reconnection support
pub struct NodeConnection {
    config: NodeConfig,
    reconnect_attempts: u32,
}

impl NodeConnection {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            reconnect_attempts: 0,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.config.url
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Calculate delay before next reconnection attempt
    pub fn next_backoff_delay(&self) -> Duration {
        self.config.backoff_delay(self.reconnect_attempts)
    }

    /// Single connection attempt; verifies the node answers `eth_blockNumber`
    pub async fn connect(&mut self) -> Result<NodeRpc, RpcError> {
        let endpoint = if self.config.is_ipc() {
            let expanded = expand_path(&self.config.url);
            if !Path::new(&expanded).exists() {
                return Err(RpcError::SocketNotFound(expanded));
            }
            expanded
        } else {
            self.config.url.clone()
        };

        info!("Connecting to node at {}", endpoint);

        let provider = ProviderBuilder::new()
            .on_builtin(&endpoint)
            .await
            .map_err(|e| RpcError::ConnectionFailed(e.to_string()))?;
        let rpc = NodeRpc::new(provider);
        let head = rpc.head_block_number().await?;

        self.reconnect_attempts = 0;
        info!("Connected to node, head block {}", head);

        Ok(rpc)
    }

    /// Connect, retrying with exponential backoff until the attempt budget is spent
    pub async fn connect_with_backoff(&mut self) -> Result<NodeRpc, RpcError> {
        loop {
            match self.connect().await {
                Ok(rpc) => return Ok(rpc),
                Err(e) => {
                    error!("Connection attempt {} failed: {}", self.reconnect_attempts + 1, e);
                }
            }

            self.reconnect_attempts += 1;
            if self.reconnect_attempts >= self.config.max_reconnect_attempts {
                return Err(RpcError::MaxReconnectAttemptsExceeded(
                    self.config.max_reconnect_attempts,
                ));
            }

            let delay = self.next_backoff_delay();
            warn!(
                "Reconnecting (attempt {}/{}), waiting {:?}",
                self.reconnect_attempts + 1,
                self.config.max_reconnect_attempts,
                delay
            );
            sleep(delay).await;
        }
    }
}

/// [`ChainRpc`] backed by an alloy provider issuing raw JSON-RPC requests
pub struct NodeRpc {
    provider: RootProvider<BoxTransport>,
}

impl NodeRpc {
    pub fn new(provider: RootProvider<BoxTransport>) -> Self {
        Self { provider }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.provider
            .raw_request::<Value, Value>(Cow::Owned(method.to_string()), params)
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))
    }
}

fn optional(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        other => Some(other),
    }
}

#[async_trait]
impl ChainRpc for NodeRpc {
    async fn head_block_number(&self) -> Result<u64, RpcError> {
        let value = self.request("eth_blockNumber", json!([])).await?;
        parse_quantity(&value).ok_or_else(|| RpcError::Malformed {
            method: "eth_blockNumber".to_string(),
            reason: format!("not a quantity: {}", value),
        })
    }

    async fn block_with_transactions(&self, number: u64) -> Result<Option<Value>, RpcError> {
        let value = self
            .request("eth_getBlockByNumber", json!([format!("{:#x}", number), true]))
            .await?;
        Ok(optional(value))
    }

    async fn block_hashes_only(&self, number: u64) -> Result<Option<Value>, RpcError> {
        let value = self
            .request("eth_getBlockByNumber", json!([format!("{:#x}", number), false]))
            .await?;
        Ok(optional(value))
    }

    async fn transaction_by_hash(&self, hash: &str) -> Result<Option<Value>, RpcError> {
        let value = self.request("eth_getTransactionByHash", json!([hash])).await?;
        Ok(optional(value))
    }

    async fn send_raw(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.request(method, params).await
    }
}
