//! Compliance Rule Engine
//!
//! An ordered list of independent rules. Every rule runs against every traced
//! transaction and the engine collects whatever fires; rules never see each
//! other's results. New rules are appended with [`ComplianceEngine::push_rule`].

use std::collections::HashSet;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::alert::Severity;
use crate::analyzer::DEFAULT_HIGH_GAS_THRESHOLD;
use crate::decoder::RawTransaction;
use crate::heuristics::{
    call_recipient, delegatecall_depths, distinct_risky_opcodes, reentrancy_suspected, total_gas,
    VALUE_CALL_OPCODES,
};
use crate::trace::ExecutionTrace;

/// Default number of internal `CALL`s tolerated before a flood is reported
pub const DEFAULT_INTERNAL_CALL_THRESHOLD: usize = 5;

/// Identifiers of the built-in rules
///
/// Rules own their identifier; additional rules pick any id not listed here.
pub mod rule_id {
    pub const BLACKLISTED_ADDRESS: &str = "BLACKLISTED_ADDRESS";
    pub const SELF_TRANSFER_LOOP: &str = "SELF_TRANSFER_LOOP";
    pub const HIGH_GAS_USAGE: &str = "HIGH_GAS_USAGE";
    pub const INTERNAL_TRANSFER_FLOOD: &str = "INTERNAL_TRANSFER_FLOOD";
    pub const RISKY_OPCODE_USAGE: &str = "RISKY_OPCODE_USAGE";
    pub const REENTRANCY_SUSPECTED: &str = "REENTRANCY_SUSPECTED";
}

/// A policy violation raised by one rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceIssue {
    pub rule: String,
    /// Base severity of the raising rule
    pub severity: Severity,
    pub details: String,
    pub flagged: bool,
}

impl ComplianceIssue {
    pub fn new(rule: impl Into<String>, severity: Severity, details: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            severity,
            details: details.into(),
            flagged: true,
        }
    }
}

/// Policy configuration for the built-in rules
///
/// The high-gas threshold is not part of this section: the rule shares
/// `analyzer.high_gas_threshold` so both checks always agree.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComplianceConfig {
    pub blacklist: Vec<Address>,
    pub internal_call_threshold: usize,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            blacklist: Vec::new(),
            internal_call_threshold: DEFAULT_INTERNAL_CALL_THRESHOLD,
        }
    }
}

/// A single compliance check
pub trait ComplianceRule: Send + Sync {
    /// Identifier carried by every issue this rule raises, part of the alert key
    fn id(&self) -> &'static str;

    /// Base severity before report-based escalation
    fn severity(&self) -> Severity;

    fn evaluate(&self, trace: &ExecutionTrace, tx: &RawTransaction) -> Option<ComplianceIssue>;

    /// Issue stamped with this rule's id and severity
    fn issue(&self, details: impl Into<String>) -> ComplianceIssue
    where
        Self: Sized,
    {
        ComplianceIssue::new(self.id(), self.severity(), details)
    }
}

/// `to` or `from` appears in the denylist
pub struct BlacklistRule {
    denylist: HashSet<Address>,
}

impl BlacklistRule {
    pub fn new(denylist: impl IntoIterator<Item = Address>) -> Self {
        Self {
            denylist: denylist.into_iter().collect(),
        }
    }
}

impl ComplianceRule for BlacklistRule {
    fn id(&self) -> &'static str {
        rule_id::BLACKLISTED_ADDRESS
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }

    fn evaluate(&self, _trace: &ExecutionTrace, tx: &RawTransaction) -> Option<ComplianceIssue> {
        let hits: Vec<String> = [("to", tx.to), ("from", tx.from)]
            .into_iter()
            .filter_map(|(role, addr)| {
                addr.filter(|a| self.denylist.contains(a))
                    .map(|a| format!("{} {:#x}", role, a))
            })
            .collect();

        if hits.is_empty() {
            return None;
        }
        Some(self.issue(format!("Blacklisted address involved: {}", hits.join(", "))))
    }
}

/// An internal value call routes funds back to the transaction sender
pub struct SelfTransferLoopRule;

impl ComplianceRule for SelfTransferLoopRule {
    fn id(&self) -> &'static str {
        rule_id::SELF_TRANSFER_LOOP
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn evaluate(&self, trace: &ExecutionTrace, tx: &RawTransaction) -> Option<ComplianceIssue> {
        let sender = tx.from?;
        let loops = trace
            .steps()
            .iter()
            .filter(|step| VALUE_CALL_OPCODES.contains(&step.op.as_str()))
            .filter(|step| call_recipient(step) == Some(sender))
            .count();

        if loops == 0 {
            return None;
        }
        Some(self.issue(format!(
            "{} internal call(s) send funds back to sender {:#x}",
            loops, sender
        )))
    }
}

/// Total gas above the configured threshold
pub struct HighGasUsageRule {
    threshold: u64,
}

impl HighGasUsageRule {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }
}

impl ComplianceRule for HighGasUsageRule {
    fn id(&self) -> &'static str {
        rule_id::HIGH_GAS_USAGE
    }

    fn severity(&self) -> Severity {
        Severity::Low
    }

    fn evaluate(&self, trace: &ExecutionTrace, _tx: &RawTransaction) -> Option<ComplianceIssue> {
        let gas = total_gas(trace);
        (gas > self.threshold).then(|| {
            self.issue(format!("Gas usage {} exceeds threshold {}", gas, self.threshold))
        })
    }
}

/// More internal `CALL`s than the configured threshold
pub struct InternalTransferFloodRule {
    threshold: usize,
}

impl InternalTransferFloodRule {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }
}

impl ComplianceRule for InternalTransferFloodRule {
    fn id(&self) -> &'static str {
        rule_id::INTERNAL_TRANSFER_FLOOD
    }

    fn severity(&self) -> Severity {
        Severity::Medium
    }

    fn evaluate(&self, trace: &ExecutionTrace, _tx: &RawTransaction) -> Option<ComplianceIssue> {
        let calls = trace.steps().iter().filter(|step| step.op == "CALL").count();
        (calls > self.threshold).then(|| {
            self.issue(format!("{} internal CALLs exceed threshold {}", calls, self.threshold))
        })
    }
}

/// Any risky opcode executed
pub struct RiskyOpcodeRule;

impl ComplianceRule for RiskyOpcodeRule {
    fn id(&self) -> &'static str {
        rule_id::RISKY_OPCODE_USAGE
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn evaluate(&self, trace: &ExecutionTrace, _tx: &RawTransaction) -> Option<ComplianceIssue> {
        let ops = distinct_risky_opcodes(trace.steps());
        if ops.is_empty() {
            return None;
        }
        let names: Vec<&str> = ops.into_iter().collect();
        Some(self.issue(format!("Risky opcodes executed: {}", names.join(", "))))
    }
}

/// `DELEGATECALL` at more than one call depth
pub struct ReentrancyRule;

impl ComplianceRule for ReentrancyRule {
    fn id(&self) -> &'static str {
        rule_id::REENTRANCY_SUSPECTED
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn evaluate(&self, trace: &ExecutionTrace, _tx: &RawTransaction) -> Option<ComplianceIssue> {
        let depths = delegatecall_depths(trace.steps());
        if !reentrancy_suspected(&depths) {
            return None;
        }
        let depths: Vec<String> = depths.iter().map(u64::to_string).collect();
        Some(self.issue(format!("DELEGATECALL observed at depths {}", depths.join(", "))))
    }
}

/// Runs every registered rule in order
pub struct ComplianceEngine {
    rules: Vec<Box<dyn ComplianceRule>>,
}

impl ComplianceEngine {
    /// Engine with the built-in rules in their canonical order
    ///
    /// `high_gas_threshold` is the analyzer's threshold, so the rule and the
    /// report's `high_gas_usage` flag fire on the same transactions.
    pub fn new(config: &ComplianceConfig, high_gas_threshold: u64) -> Self {
        Self::with_rules(vec![
            Box::new(BlacklistRule::new(config.blacklist.iter().copied())),
            Box::new(SelfTransferLoopRule),
            Box::new(HighGasUsageRule::new(high_gas_threshold)),
            Box::new(InternalTransferFloodRule::new(config.internal_call_threshold)),
            Box::new(RiskyOpcodeRule),
            Box::new(ReentrancyRule),
        ])
    }

    pub fn with_rules(rules: Vec<Box<dyn ComplianceRule>>) -> Self {
        Self { rules }
    }

    pub fn push_rule(&mut self, rule: Box<dyn ComplianceRule>) {
        self.rules.push(rule);
    }

    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.id()).collect()
    }

    pub fn evaluate(&self, trace: &ExecutionTrace, tx: &RawTransaction) -> Vec<ComplianceIssue> {
        self.rules.iter().filter_map(|rule| rule.evaluate(trace, tx)).collect()
    }
}

impl Default for ComplianceEngine {
    fn default() -> Self {
        Self::new(&ComplianceConfig::default(), DEFAULT_HIGH_GAS_THRESHOLD)
    }
}
