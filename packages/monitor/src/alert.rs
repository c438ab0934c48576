//! Alerts
//!
//! One alert per triggered compliance issue. The `(tx_hash, rule)` pair is the
//! identity key every sink deduplicates on.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::analyzer::RiskReport;
use crate::compliance::ComplianceIssue;
use crate::decoder::{RawTransaction, TokenTransfer};

/// Alert severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// One level up, saturating at `Critical`
    pub fn escalate(self) -> Self {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }

    /// Rule base severity, escalated once when the report shows two or more signals
    pub fn classify(base: Severity, report: &RiskReport) -> Self {
        if report.signal_count() >= 2 {
            base.escalate()
        } else {
            base
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compliance alert ready for persistence and notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub tx_hash: String,
    pub block_number: u64,
    /// Unix timestamp in milliseconds when the alert was assembled
    pub timestamp: u64,
    /// Identifier of the rule that raised it
    pub rule: String,
    pub details: String,
    pub severity: Severity,
    pub from: Option<Address>,
    pub to: Option<Address>,
    /// Decoded token transfer, when the calldata was a plain `transfer`
    pub transfer: Option<TokenTransfer>,
    pub risk_report: RiskReport,
}

impl Alert {
    /// Assemble an alert for one compliance issue
    pub fn assemble(
        tx: &RawTransaction,
        block_number: u64,
        issue: &ComplianceIssue,
        report: &RiskReport,
        transfer: Option<TokenTransfer>,
    ) -> Self {
        Alert {
            tx_hash: tx.hash.to_lowercase(),
            block_number,
            timestamp: current_timestamp_millis(),
            rule: issue.rule.clone(),
            details: issue.details.clone(),
            severity: Severity::classify(issue.severity, report),
            from: tx.from,
            to: tx.to,
            transfer,
            risk_report: report.clone(),
        }
    }

    /// Identity key: `<tx_hash>:<RULE>`
    pub fn key(&self) -> String {
        alert_key(&self.tx_hash, &self.rule)
    }

    /// One-line human summary used by chat-style channels
    pub fn summary(&self) -> String {
        format!(
            "[{}] {} in tx {} (block {}): {}",
            self.severity.as_str().to_uppercase(),
            self.rule,
            self.tx_hash,
            self.block_number,
            self.details
        )
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Build the identity key for a `(tx_hash, rule)` pair
pub fn alert_key(tx_hash: &str, rule: &str) -> String {
    format!("{}:{}", tx_hash.to_lowercase(), rule)
}

/// Get current timestamp in milliseconds
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
