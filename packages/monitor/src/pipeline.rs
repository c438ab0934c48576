//! Pipeline Coordinator
//!
//! Runs one transaction through filter, trace, analysis and compliance, then
//! hands every resulting alert to the configured sinks.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::alert::Alert;
use crate::analyzer::TraceAnalyzer;
use crate::compliance::ComplianceEngine;
use crate::decoder::{is_valid_tx_hash, RawTransaction};
use crate::filter::{FilterDecision, TokenFilter};
use crate::notifier::{LiveNotifier, Notifier};
use crate::store::AlertStore;
use crate::trace::{TraceFetcher, TraceLookup};

/// Where assembled alerts go
#[derive(Clone)]
pub struct AlertSinks {
    pub store: Arc<dyn AlertStore>,
    pub live: Option<Arc<dyn LiveNotifier>>,
    pub channels: Vec<Arc<dyn Notifier>>,
}

impl AlertSinks {
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self {
            store,
            live: None,
            channels: Vec::new(),
        }
    }

    pub fn with_live(mut self, live: Arc<dyn LiveNotifier>) -> Self {
        self.live = Some(live);
        self
    }

    pub fn with_channel(mut self, channel: Arc<dyn Notifier>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Deliver one alert to every sink concurrently
    ///
    /// # Returns
    /// The number of sinks that failed; failures are logged, never propagated
    pub async fn dispatch(&self, alert: &Alert) -> usize {
        let store = async {
            match self.store.upsert(alert.clone()).await {
                Ok(_) => true,
                Err(e) => {
                    error!("Alert store rejected {}: {}", alert.key(), e);
                    false
                }
            }
        };

        let live = async {
            match &self.live {
                Some(live) => match live.publish(alert).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!("Live publish of {} failed: {}", alert.key(), e);
                        false
                    }
                },
                None => true,
            }
        };

        let channels = join_all(self.channels.iter().map(|channel| async move {
            match channel.send(alert).await {
                Ok(()) => true,
                Err(e) => {
                    error!("Notifier {} failed for {}: {}", channel.name(), alert.key(), e);
                    false
                }
            }
        }));

        let (stored, published, sent) = tokio::join!(store, live, channels);
        [stored, published]
            .into_iter()
            .chain(sent)
            .filter(|ok| !ok)
            .count()
    }
}

/// Terminal state of one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Malformed,
    MissingSender,
    FilteredOut,
    TraceUnavailable,
    /// Traced and evaluated, no compliance issue
    Clean,
    /// Number of alerts dispatched
    Alerted(usize),
}

/// Per-transaction processing, shared by all tasks of a batch
pub struct Pipeline {
    filter: TokenFilter,
    traces: TraceFetcher,
    analyzer: TraceAnalyzer,
    engine: ComplianceEngine,
    sinks: AlertSinks,
}

impl Pipeline {
    pub fn new(
        filter: TokenFilter,
        traces: TraceFetcher,
        analyzer: TraceAnalyzer,
        engine: ComplianceEngine,
        sinks: AlertSinks,
    ) -> Self {
        Self {
            filter,
            traces,
            analyzer,
            engine,
            sinks,
        }
    }

    pub fn filter(&self) -> &TokenFilter {
        &self.filter
    }

    /// Process a transaction found in `block`
    pub async fn process(&self, tx: &RawTransaction, block: u64) -> TxOutcome {
        if !is_valid_tx_hash(&tx.hash) {
            warn!("Block {}: dropping transaction with malformed hash {:?}", block, tx.hash);
            return TxOutcome::Malformed;
        }

        let involvement = match self.filter.classify(tx) {
            FilterDecision::Involved(involvement) => involvement,
            FilterDecision::MissingSender => {
                warn!("Block {}: transaction {} has no sender, skipping", block, tx.hash);
                return TxOutcome::MissingSender;
            }
            FilterDecision::Unrelated => return TxOutcome::FilteredOut,
        };

        let trace = match self.traces.fetch(&tx.hash).await {
            TraceLookup::Available(trace) => trace,
            _ => return TxOutcome::TraceUnavailable,
        };

        let report = self.analyzer.analyze(&trace);
        let issues = self.engine.evaluate(&trace, tx);

        if issues.is_empty() {
            if report.flagged {
                debug!("Transaction {} has risk signals but no compliance issue", tx.hash);
            }
            return TxOutcome::Clean;
        }

        let alerts: Vec<Alert> = issues
            .iter()
            .map(|issue| Alert::assemble(tx, block, issue, &report, involvement.transfer.clone()))
            .collect();

        for alert in &alerts {
            info!(
                tx_hash = %alert.tx_hash,
                rule = %alert.rule,
                severity = %alert.severity,
                "Compliance issue detected"
            );
        }

        join_all(alerts.iter().map(|alert| self.sinks.dispatch(alert))).await;
        TxOutcome::Alerted(alerts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::RiskReport;
    use crate::alert::Severity;
    use crate::analyzer::DEFAULT_HIGH_GAS_THRESHOLD;
    use crate::compliance::{rule_id, ComplianceConfig, ComplianceIssue};
    use crate::notifier::NotifyError;
    use crate::retry::RetryPolicy;
    use crate::rpc::{MockChainRpc, RpcError};
    use crate::store::MemoryAlertStore;
    use alloy::primitives::{address, Address, U256};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TOKEN: Address = address!("6c3ea9036406852006290770BEdFcAbA0e23A0e8");
    const SENDER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

    fn hash() -> String {
        format!("0x{}", "5a".repeat(32))
    }

    fn tx(to: Option<Address>) -> RawTransaction {
        RawTransaction {
            hash: hash(),
            from: Some(SENDER),
            to,
            input: Some("0x".to_string()),
            value: U256::ZERO,
            block_number: Some(10),
        }
    }

    fn clean_trace() -> Value {
        json!({
            "gas": 21000,
            "structLogs": [
                { "pc": 0, "op": "PUSH1", "gas": 100000, "depth": 1, "stack": [] },
                { "pc": 2, "op": "STOP", "gas": 99997, "depth": 1, "stack": [] }
            ]
        })
    }

    fn pipeline(rpc: MockChainRpc, sinks: AlertSinks, blacklist: Vec<Address>) -> Pipeline {
        let rpc = Arc::new(rpc);
        let config = ComplianceConfig {
            blacklist,
            ..Default::default()
        };
        Pipeline::new(
            TokenFilter::new(TOKEN),
            TraceFetcher::new(rpc, RetryPolicy::new(1, 1)),
            TraceAnalyzer::default(),
            ComplianceEngine::new(&config, DEFAULT_HIGH_GAS_THRESHOLD),
            sinks,
        )
    }

    struct CountingChannel {
        sent: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for CountingChannel {
        fn name(&self) -> &str {
            "counting"
        }

        async fn send(&self, _alert: &Alert) -> Result<(), NotifyError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotifyError::Status(500))
            } else {
                Ok(())
            }
        }
    }

    // ==================== filtering tests ====================

    #[tokio::test]
    async fn test_unrelated_transaction_never_traced() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_send_raw().never();
        let store = Arc::new(MemoryAlertStore::new());
        let pipeline = pipeline(rpc, AlertSinks::new(store.clone()), vec![]);

        let other = address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D");
        assert_eq!(pipeline.process(&tx(Some(other)), 10).await, TxOutcome::FilteredOut);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_sender_and_bad_hash() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_send_raw().never();
        let pipeline = pipeline(rpc, AlertSinks::new(Arc::new(MemoryAlertStore::new())), vec![]);

        let mut anonymous = tx(Some(TOKEN));
        anonymous.from = None;
        assert_eq!(pipeline.process(&anonymous, 10).await, TxOutcome::MissingSender);

        let mut bad = tx(Some(TOKEN));
        bad.hash = "synthetic:10:0".to_string();
        assert_eq!(pipeline.process(&bad, 10).await, TxOutcome::Malformed);
    }

    // ==================== trace tests ====================

    #[tokio::test]
    async fn test_clean_trace_emits_nothing() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_send_raw().times(1).returning(|_, _| Ok(clean_trace()));
        let store = Arc::new(MemoryAlertStore::new());
        let pipeline = pipeline(rpc, AlertSinks::new(store.clone()), vec![]);

        assert_eq!(pipeline.process(&tx(Some(TOKEN)), 10).await, TxOutcome::Clean);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_trace_is_unavailable() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_send_raw()
            .times(1)
            .returning(|_, _| Ok(json!({ "structLogs": "not-an-array" })));
        let store = Arc::new(MemoryAlertStore::new());
        let pipeline = pipeline(rpc, AlertSinks::new(store.clone()), vec![TOKEN]);

        assert_eq!(pipeline.process(&tx(Some(TOKEN)), 10).await, TxOutcome::TraceUnavailable);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_trace_is_unavailable() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_send_raw()
            .times(2)
            .returning(|_, _| Err(RpcError::Transport("connection reset".to_string())));
        let pipeline = pipeline(rpc, AlertSinks::new(Arc::new(MemoryAlertStore::new())), vec![]);

        assert_eq!(pipeline.process(&tx(Some(TOKEN)), 10).await, TxOutcome::TraceUnavailable);
    }

    // ==================== dispatch tests ====================

    #[tokio::test]
    async fn test_blacklisted_recipient_persists_one_alert() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_send_raw().returning(|_, _| Ok(clean_trace()));
        let store = Arc::new(MemoryAlertStore::new());
        let pipeline = pipeline(rpc, AlertSinks::new(store.clone()), vec![TOKEN]);

        assert_eq!(pipeline.process(&tx(Some(TOKEN)), 10).await, TxOutcome::Alerted(1));
        assert_eq!(store.len(), 1);
        let alert = store.get(&hash(), rule_id::BLACKLISTED_ADDRESS).unwrap();
        assert_eq!(alert.block_number, 10);
    }

    #[tokio::test]
    async fn test_failing_channel_does_not_block_siblings() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_send_raw().returning(|_, _| Ok(clean_trace()));
        let store = Arc::new(MemoryAlertStore::new());
        let failing = Arc::new(CountingChannel {
            sent: AtomicUsize::new(0),
            fail: true,
        });
        let healthy = Arc::new(CountingChannel {
            sent: AtomicUsize::new(0),
            fail: false,
        });
        let sinks = AlertSinks::new(store.clone())
            .with_channel(failing.clone())
            .with_channel(healthy.clone());
        let pipeline = pipeline(rpc, sinks, vec![TOKEN]);

        assert_eq!(pipeline.process(&tx(Some(TOKEN)), 10).await, TxOutcome::Alerted(1));
        assert_eq!(failing.sent.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.sent.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_counts_failures() {
        let sinks = AlertSinks::new(Arc::new(MemoryAlertStore::new())).with_channel(Arc::new(
            CountingChannel {
                sent: AtomicUsize::new(0),
                fail: true,
            },
        ));

        let issue = ComplianceIssue::new(rule_id::HIGH_GAS_USAGE, Severity::Low, "gas");
        let alert = Alert::assemble(&tx(None), 1, &issue, &RiskReport::default(), None);
        assert_eq!(sinks.dispatch(&alert).await, 1);
    }
}
