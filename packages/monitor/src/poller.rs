//! Block Poller
//!
//! Drives the pipeline across an advancing block range. The cursor lives in
//! the poll loop; readers observe progress through a watch channel.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::analyzer::TraceAnalyzer;
use crate::block_fetcher::BlockFetcher;
use crate::compliance::ComplianceEngine;
use crate::config::MonitorConfig;
use crate::filter::TokenFilter;
use crate::pipeline::{AlertSinks, Pipeline, TxOutcome};
use crate::retry::{with_retry, RetryPolicy};
use crate::rpc::{ChainRpc, RpcError};
use crate::trace::TraceFetcher;

/// Default wait between poll iterations (roughly one mainnet slot)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 12_000;

/// Default number of blocks per batch
pub const DEFAULT_BATCH_SIZE: u64 = 10;

/// Default number of transactions processed concurrently
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// Poll loop configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub poll_interval_ms: u64,
    pub batch_size: u64,
    pub max_concurrency: usize,
    /// First block to process; `None` starts after the current head
    pub start_block: Option<u64>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            start_block: None,
        }
    }
}

impl PollerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Last fully attempted block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockCursor {
    latest_processed: Option<u64>,
}

impl BlockCursor {
    /// Cursor that will process `start_block` first, or an unset cursor
    pub fn new(start_block: Option<u64>) -> Self {
        Self {
            latest_processed: start_block.map(|block| block.saturating_sub(1)),
        }
    }

    pub fn latest_processed(&self) -> Option<u64> {
        self.latest_processed
    }

    pub fn is_initialized(&self) -> bool {
        self.latest_processed.is_some()
    }

    /// Move forward to `block`; never moves backwards
    pub fn advance_to(&mut self, block: u64) {
        self.latest_processed = Some(
            self.latest_processed
                .map_or(block, |current| current.max(block)),
        );
    }

    /// Block ranges still to process up to `head`, `batch_size` blocks each
    pub fn pending_batches(&self, head: u64, batch_size: u64) -> Vec<RangeInclusive<u64>> {
        let Some(latest) = self.latest_processed else {
            return Vec::new();
        };
        batch_ranges(latest.saturating_add(1), head, batch_size)
    }
}

/// Split `from..=to` into consecutive ranges of at most `size` blocks
pub fn batch_ranges(from: u64, to: u64, size: u64) -> Vec<RangeInclusive<u64>> {
    let size = size.max(1);
    let mut ranges = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(size - 1).min(to);
        ranges.push(start..=end);
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    ranges
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Starting,
    Initializing,
    Polling,
    Processing,
    Idle,
}

/// Snapshot exposed to readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub current_block: Option<u64>,
    pub state: MonitorState,
}

/// Tally of one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub blocks: u64,
    pub failed_blocks: Vec<u64>,
    pub transactions: usize,
    pub traced: usize,
    pub alerts: usize,
    pub panicked: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: TxOutcome) {
        self.transactions += 1;
        match outcome {
            TxOutcome::Clean => self.traced += 1,
            TxOutcome::Alerted(count) => {
                self.traced += 1;
                self.alerts += count;
            }
            _ => {}
        }
    }

    fn merge(&mut self, other: BatchSummary) {
        self.blocks += other.blocks;
        self.failed_blocks.extend(other.failed_blocks);
        self.transactions += other.transactions;
        self.traced += other.traced;
        self.alerts += other.alerts;
        self.panicked += other.panicked;
    }
}

/// The block monitor
pub struct Monitor {
    rpc: Arc<dyn ChainRpc>,
    fetcher: Arc<BlockFetcher>,
    pipeline: Arc<Pipeline>,
    config: PollerConfig,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
    status: watch::Sender<MonitorStatus>,
}

impl Monitor {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        fetcher: BlockFetcher,
        pipeline: Pipeline,
        config: PollerConfig,
        retry: RetryPolicy,
    ) -> Self {
        let (status, _) = watch::channel(MonitorStatus {
            current_block: config.start_block.map(|block| block.saturating_sub(1)),
            state: MonitorState::Starting,
        });
        Self {
            rpc,
            fetcher: Arc::new(fetcher),
            pipeline: Arc::new(pipeline),
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            config,
            retry,
            status,
        }
    }

    /// Wire every component from a loaded configuration
    pub fn from_config(rpc: Arc<dyn ChainRpc>, config: &MonitorConfig, sinks: AlertSinks) -> Self {
        let pipeline = Pipeline::new(
            TokenFilter::new(config.token_address),
            TraceFetcher::new(rpc.clone(), config.retry),
            TraceAnalyzer::new(config.analyzer.clone()),
            ComplianceEngine::new(&config.compliance, config.analyzer.high_gas_threshold),
            sinks,
        );
        let fetcher = BlockFetcher::new(rpc.clone(), config.retry, config.hash_batch_size);
        Self::new(rpc, fetcher, pipeline, config.poller.clone(), config.retry)
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Current status snapshot
    pub fn status(&self) -> MonitorStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status change
    pub fn subscribe(&self) -> watch::Receiver<MonitorStatus> {
        self.status.subscribe()
    }

    fn publish_status(&self, cursor: &BlockCursor, state: MonitorState) {
        self.status.send_replace(MonitorStatus {
            current_block: cursor.latest_processed(),
            state,
        });
    }

    /// Poll forever, one iteration per poll interval
    ///
    /// Errors inside an iteration are logged; the next iteration is always
    /// scheduled.
    pub async fn start_monitoring(&self) {
        let mut cursor = BlockCursor::new(self.config.start_block);
        info!(
            "Monitoring started (start block {:?}, batch {}, concurrency {})",
            self.config.start_block, self.config.batch_size, self.config.max_concurrency
        );

        loop {
            match self.poll_once(&mut cursor).await {
                Ok(summary) if summary.blocks > 0 => info!(
                    "Processed {} block(s), {} tx(s), {} traced, {} alert(s), cursor at {:?}",
                    summary.blocks,
                    summary.transactions,
                    summary.traced,
                    summary.alerts,
                    cursor.latest_processed()
                ),
                Ok(_) => debug!("No new blocks"),
                Err(e) => error!("Poll iteration failed: {}", e),
            }

            self.publish_status(&cursor, MonitorState::Idle);
            sleep(self.config.poll_interval()).await;
        }
    }

    /// Run a single poll iteration against `cursor`
    ///
    /// # Returns
    /// The combined summary of every batch processed, or the head-query error
    pub async fn poll_once(&self, cursor: &mut BlockCursor) -> Result<BatchSummary, RpcError> {
        if !cursor.is_initialized() {
            self.publish_status(cursor, MonitorState::Initializing);
            let head = self.head().await?;
            info!("Cursor initialized at chain head {}", head);
            cursor.advance_to(head);
        }

        self.publish_status(cursor, MonitorState::Polling);
        let head = self.head().await?;

        let mut total = BatchSummary::default();
        for range in cursor.pending_batches(head, self.config.batch_size) {
            self.publish_status(cursor, MonitorState::Processing);
            let upper = *range.end();
            let summary = self.process_batch(range).await;
            if !summary.failed_blocks.is_empty() {
                warn!("Skipped failed block(s) {:?}", summary.failed_blocks);
            }
            cursor.advance_to(upper);
            self.publish_status(cursor, MonitorState::Processing);
            total.merge(summary);
        }

        Ok(total)
    }

    async fn head(&self) -> Result<u64, RpcError> {
        let rpc = self.rpc.as_ref();
        with_retry(&self.retry, "eth_blockNumber", || rpc.head_block_number()).await
    }

    /// Fetch the blocks of `range` in order and process their transactions
    ///
    /// Returns once every spawned transaction task has finished.
    pub async fn process_batch(&self, range: RangeInclusive<u64>) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let mut tasks = JoinSet::new();

        for block in range {
            summary.blocks += 1;
            let fetched = match self.fetcher.fetch(block).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    error!("Block {} failed: {}", block, e);
                    summary.failed_blocks.push(block);
                    continue;
                }
            };

            debug!(
                "Block {}: {} transaction(s) via {}",
                block,
                fetched.transactions.len(),
                fetched.tier
            );

            for tx in fetched.transactions {
                let pipeline = self.pipeline.clone();
                let permits = self.permits.clone();
                tasks.spawn(async move {
                    let _permit = permits.acquire_owned().await.ok()?;
                    Some(pipeline.process(&tx, block).await)
                });
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(outcome)) => summary.record(outcome),
                Ok(None) => warn!("Transaction task dropped: concurrency limiter closed"),
                Err(e) => {
                    error!("Transaction task panicked: {}", e);
                    summary.panicked += 1;
                }
            }
        }

        summary
    }
}
