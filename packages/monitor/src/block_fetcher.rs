//! Block Transaction Fetcher
//!
//! Returns the transactions of a block by trying an ordered list of
//! strategies, from the cheapest single call to a trace-based reconstruction.
//! The first strategy that succeeds wins; later ones are never invoked.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::decoder::{parse_address, parse_u256, RawTransaction};
use crate::retry::{with_retry, RetryPolicy};
use crate::rpc::{ChainRpc, RpcError};

/// Default number of individual transaction lookups in flight per batch
pub const DEFAULT_HASH_BATCH_SIZE: usize = 10;

/// Block-level trace method used by the last-resort strategy
pub const BLOCK_TRACE_METHOD: &str = "trace_block";

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Block {0} not found")]
    BlockNotFound(u64),

    #[error("Block {block}: {reason}")]
    Malformed { block: u64, reason: String },

    #[error("Block {block}: all fetch strategies failed, last error: {last}")]
    Exhausted { block: u64, last: String },
}

/// Position of a strategy in the fallback chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchTier {
    Direct,
    HashThenFetch,
    TraceDerived,
}

impl fmt::Display for FetchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchTier::Direct => "direct",
            FetchTier::HashThenFetch => "hash-then-fetch",
            FetchTier::TraceDerived => "trace-derived",
        };
        f.write_str(name)
    }
}

/// One way of obtaining a block's transactions
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn tier(&self) -> FetchTier;

    async fn fetch(&self, block: u64) -> Result<Vec<RawTransaction>, FetchError>;
}

/// Transactions of one block plus the strategy that produced them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBlock {
    pub number: u64,
    pub tier: FetchTier,
    pub transactions: Vec<RawTransaction>,
}

/// Extract the `transactions` array of a block object
fn transactions_array(block: u64, payload: Option<Value>) -> Result<Vec<Value>, FetchError> {
    let payload = payload.ok_or(FetchError::BlockNotFound(block))?;
    match payload.get("transactions") {
        Some(Value::Array(entries)) => Ok(entries.clone()),
        Some(_) => Err(FetchError::Malformed {
            block,
            reason: "transactions is not an array".to_string(),
        }),
        None => Err(FetchError::Malformed {
            block,
            reason: "block has no transactions field".to_string(),
        }),
    }
}

/// Block with full transaction objects in a single call
pub struct DirectStrategy {
    rpc: Arc<dyn ChainRpc>,
    retry: RetryPolicy,
}

impl DirectStrategy {
    pub fn new(rpc: Arc<dyn ChainRpc>, retry: RetryPolicy) -> Self {
        Self { rpc, retry }
    }
}

#[async_trait]
impl FetchStrategy for DirectStrategy {
    fn tier(&self) -> FetchTier {
        FetchTier::Direct
    }

    /// Explicit `null` entries are skipped. Any other entry that is not a
    /// transaction object fails the tier so the next one gets a chance.
    async fn fetch(&self, block: u64) -> Result<Vec<RawTransaction>, FetchError> {
        let rpc = self.rpc.as_ref();
        let payload = with_retry(&self.retry, "eth_getBlockByNumber(full)", || {
            rpc.block_with_transactions(block)
        })
        .await?;
        let entries = transactions_array(block, payload)?;

        let mut transactions = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            if entry.is_null() {
                warn!("Block {}: skipping null transaction entry {}", block, index);
                continue;
            }
            let tx = RawTransaction::from_json(entry).ok_or_else(|| FetchError::Malformed {
                block,
                reason: format!("transaction entry {} is not a transaction object", index),
            })?;
            transactions.push(tx);
        }
        Ok(transactions)
    }
}

/// Block with hashes only, then one lookup per hash in bounded batches
pub struct HashThenFetchStrategy {
    rpc: Arc<dyn ChainRpc>,
    retry: RetryPolicy,
    batch_size: usize,
}

impl HashThenFetchStrategy {
    pub fn new(rpc: Arc<dyn ChainRpc>, retry: RetryPolicy, batch_size: usize) -> Self {
        Self {
            rpc,
            retry,
            batch_size: batch_size.max(1),
        }
    }

    async fn fetch_one(&self, block: u64, hash: &str) -> Option<RawTransaction> {
        let rpc = self.rpc.as_ref();
        let lookup = with_retry(&self.retry, "eth_getTransactionByHash", || {
            rpc.transaction_by_hash(hash)
        })
        .await;
        match lookup {
            Ok(Some(value)) => {
                let tx = RawTransaction::from_json(&value);
                if tx.is_none() {
                    warn!("Block {}: transaction {} returned a malformed payload", block, hash);
                }
                tx
            }
            Ok(None) => {
                warn!("Block {}: transaction {} not found, dropping", block, hash);
                None
            }
            Err(e) => {
                warn!("Block {}: failed to fetch transaction {}: {}", block, hash, e);
                None
            }
        }
    }
}

#[async_trait]
impl FetchStrategy for HashThenFetchStrategy {
    fn tier(&self) -> FetchTier {
        FetchTier::HashThenFetch
    }

    async fn fetch(&self, block: u64) -> Result<Vec<RawTransaction>, FetchError> {
        let rpc = self.rpc.as_ref();
        let payload = with_retry(&self.retry, "eth_getBlockByNumber(hashes)", || {
            rpc.block_hashes_only(block)
        })
        .await?;
        let entries = transactions_array(block, payload)?;

        let hashes: Vec<String> = entries
            .iter()
            .filter_map(|entry| match entry {
                Value::String(hash) => Some(hash.clone()),
                Value::Object(obj) => obj.get("hash").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect();
        if hashes.len() < entries.len() {
            warn!("Block {}: {} hash entries were unusable", block, entries.len() - hashes.len());
        }

        let mut transactions = Vec::with_capacity(hashes.len());
        for chunk in hashes.chunks(self.batch_size) {
            let fetched = join_all(chunk.iter().map(|hash| self.fetch_one(block, hash))).await;
            transactions.extend(fetched.into_iter().flatten());
        }

        debug!(
            "Block {}: fetched {}/{} transactions by hash",
            block,
            transactions.len(),
            hashes.len()
        );
        Ok(transactions)
    }
}

/// Rebuild a minimal transaction view from the block-level trace
pub struct TraceDerivedStrategy {
    rpc: Arc<dyn ChainRpc>,
    retry: RetryPolicy,
}

impl TraceDerivedStrategy {
    pub fn new(rpc: Arc<dyn ChainRpc>, retry: RetryPolicy) -> Self {
        Self { rpc, retry }
    }
}

/// Placeholder hash for trace entries that carry none
///
/// Deliberately not a valid 32-byte hash, so the trace fetcher skips it
/// instead of querying the node for a transaction that does not exist.
pub fn synthetic_hash(block: u64, index: usize) -> String {
    format!("synthetic:{}:{}", block, index)
}

/// Convert block trace entries into transactions, one per transaction hash
pub fn transactions_from_block_trace(block: u64, entries: &[Value]) -> Vec<RawTransaction> {
    let mut seen = HashSet::new();
    let mut transactions = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        let Some(action) = entry.get("action").filter(|a| a.is_object()) else {
            warn!("Block {}: skipping trace entry {} without action", block, index);
            continue;
        };

        let hash = entry
            .get("transactionHash")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| synthetic_hash(block, index));
        if !seen.insert(hash.clone()) {
            continue;
        }

        transactions.push(RawTransaction {
            hash,
            from: action.get("from").and_then(parse_address),
            to: action.get("to").and_then(parse_address),
            input: action
                .get("input")
                .or_else(|| action.get("init"))
                .and_then(Value::as_str)
                .map(str::to_string),
            value: action.get("value").and_then(parse_u256).unwrap_or_default(),
            block_number: Some(block),
        });
    }

    transactions
}

#[async_trait]
impl FetchStrategy for TraceDerivedStrategy {
    fn tier(&self) -> FetchTier {
        FetchTier::TraceDerived
    }

    async fn fetch(&self, block: u64) -> Result<Vec<RawTransaction>, FetchError> {
        let rpc = self.rpc.as_ref();
        let params = json!([format!("{:#x}", block)]);
        let payload = with_retry(&self.retry, BLOCK_TRACE_METHOD, || {
            rpc.send_raw(BLOCK_TRACE_METHOD, params.clone())
        })
        .await?;

        match payload {
            Value::Array(entries) => Ok(transactions_from_block_trace(block, &entries)),
            Value::Null => Err(FetchError::BlockNotFound(block)),
            _ => Err(FetchError::Malformed {
                block,
                reason: "block trace is not an array".to_string(),
            }),
        }
    }
}

/// Tries each strategy in order until one succeeds
pub struct BlockFetcher {
    strategies: Vec<Box<dyn FetchStrategy>>,
}

impl BlockFetcher {
    /// Standard chain: direct, hash-then-fetch, trace-derived
    pub fn new(rpc: Arc<dyn ChainRpc>, retry: RetryPolicy, hash_batch_size: usize) -> Self {
        Self::with_strategies(vec![
            Box::new(DirectStrategy::new(rpc.clone(), retry)),
            Box::new(HashThenFetchStrategy::new(rpc.clone(), retry, hash_batch_size)),
            Box::new(TraceDerivedStrategy::new(rpc, retry)),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn FetchStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn tiers(&self) -> Vec<FetchTier> {
        self.strategies.iter().map(|s| s.tier()).collect()
    }

    pub async fn fetch(&self, block: u64) -> Result<FetchedBlock, FetchError> {
        let mut last_error: Option<FetchError> = None;

        for strategy in &self.strategies {
            match strategy.fetch(block).await {
                Ok(transactions) => {
                    if last_error.is_some() {
                        debug!("Block {} recovered via {} strategy", block, strategy.tier());
                    }
                    return Ok(FetchedBlock {
                        number: block,
                        tier: strategy.tier(),
                        transactions,
                    });
                }
                Err(e) => {
                    warn!("Block {}: {} strategy failed: {}", block, strategy.tier(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(FetchError::Exhausted {
            block,
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no strategies configured".to_string()),
        })
    }
}
