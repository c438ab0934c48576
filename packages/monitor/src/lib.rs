//! TraceWatch Monitor Library
//!
//! This crate provides components for following a chain block by block,
//! isolating transactions that touch a monitored token, tracing them at the
//! opcode level and raising compliance alerts to Redis and webhooks.

pub mod alert;
pub mod analyzer;
pub mod block_fetcher;
pub mod compliance;
pub mod config;
pub mod decoder;
pub mod filter;
mod heuristics;
pub mod notifier;
pub mod pipeline;
pub mod poller;
pub mod publisher;
pub mod retry;
pub mod rpc;
pub mod store;
pub mod trace;

// Re-export commonly used types
pub use alert::{Alert, Severity};
pub use analyzer::{RiskReport, TraceAnalyzer};
pub use block_fetcher::{BlockFetcher, FetchTier};
pub use compliance::{ComplianceEngine, ComplianceIssue, ComplianceRule};
pub use config::MonitorConfig;
pub use decoder::RawTransaction;
pub use filter::TokenFilter;
pub use pipeline::{AlertSinks, Pipeline, TxOutcome};
pub use poller::{BlockCursor, Monitor, MonitorState, MonitorStatus};
pub use retry::{with_retry, RetryPolicy};
pub use rpc::{ChainRpc, NodeConnection, NodeRpc};
pub use trace::{ExecutionTrace, TraceFetcher};
