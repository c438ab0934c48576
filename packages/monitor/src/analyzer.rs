//! Trace Risk Analyzer
//!
//! A single ordered pass over `structLogs` producing a [`RiskReport`]. The
//! report is forensic detail; the compliance engine decides what gets alerted.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::heuristics::{
    is_gas_spike, is_risky_opcode, is_stack_manipulation_opcode, reentrancy_suspected,
    return_data_len, total_gas,
};
use crate::trace::{ExecutionTrace, Step};

/// Default total gas above which a transaction is considered heavy
pub const DEFAULT_HIGH_GAS_THRESHOLD: u64 = 5_000_000;

/// Default return data size limit in bytes (8 KiB)
pub const DEFAULT_LARGE_RETURN_DATA_BYTES: usize = 8 * 1024;

/// Default step-to-step remaining gas ratio counted as a spike
pub const DEFAULT_GAS_SPIKE_RATIO: f64 = 1.5;

/// Tunable analyzer thresholds
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub high_gas_threshold: u64,
    pub large_return_data_bytes: usize,
    pub gas_spike_ratio: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            high_gas_threshold: DEFAULT_HIGH_GAS_THRESHOLD,
            large_return_data_bytes: DEFAULT_LARGE_RETURN_DATA_BYTES,
            gas_spike_ratio: DEFAULT_GAS_SPIKE_RATIO,
        }
    }
}

/// Location of a notable opcode in the trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpcodeHit {
    /// Index of the step in `structLogs`
    pub step: usize,
    pub pc: u64,
    pub op: String,
    pub depth: u64,
}

/// Aggregated risk signals for one trace
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskReport {
    pub risky_opcode_hits: Vec<OpcodeHit>,
    pub stack_manipulation_hits: Vec<OpcodeHit>,
    pub opcode_frequency: BTreeMap<String, u64>,
    pub max_depth: u64,
    pub gas_spike_detected: bool,
    pub high_gas_usage: bool,
    pub reentrancy_suspected: bool,
    pub large_return_data: bool,
    pub total_steps: usize,
    pub total_gas: u64,
    pub flagged: bool,
}

impl RiskReport {
    /// Number of independent flagging signals that fired
    pub fn signal_count(&self) -> usize {
        [
            !self.risky_opcode_hits.is_empty(),
            self.reentrancy_suspected,
            self.gas_spike_detected,
            self.high_gas_usage,
            self.large_return_data,
        ]
        .into_iter()
        .filter(|fired| *fired)
        .count()
    }
}

/// Stateless analyzer holding only its thresholds
#[derive(Debug, Clone, Default)]
pub struct TraceAnalyzer {
    config: AnalyzerConfig,
}

impl TraceAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn analyze(&self, trace: &ExecutionTrace) -> RiskReport {
        let mut report = RiskReport {
            total_steps: trace.struct_logs.len(),
            ..Default::default()
        };
        let mut delegate_depths = BTreeSet::new();
        let mut previous_gas: Option<u64> = None;

        for (index, step) in trace.struct_logs.iter().enumerate() {
            *report.opcode_frequency.entry(step.op.clone()).or_insert(0) += 1;

            if is_risky_opcode(&step.op) {
                report.risky_opcode_hits.push(hit(index, step));
            }
            if is_stack_manipulation_opcode(&step.op) {
                report.stack_manipulation_hits.push(hit(index, step));
            }
            if step.op == "DELEGATECALL" {
                delegate_depths.insert(step.depth);
            }

            report.max_depth = report.max_depth.max(step.depth);

            if let Some(previous) = previous_gas {
                if is_gas_spike(previous, step.gas, self.config.gas_spike_ratio) {
                    report.gas_spike_detected = true;
                }
            }
            previous_gas = Some(step.gas);
        }

        report.reentrancy_suspected = reentrancy_suspected(&delegate_depths);
        report.total_gas = total_gas(trace);
        report.high_gas_usage = report.total_gas > self.config.high_gas_threshold;
        report.large_return_data = return_data_len(trace) > self.config.large_return_data_bytes;
        report.flagged = report.signal_count() > 0;

        report
    }
}

fn hit(index: usize, step: &Step) -> OpcodeHit {
    OpcodeHit {
        step: index,
        pc: step.pc,
        op: step.op.clone(),
        depth: step.depth,
    }
}
