//! Shared trace heuristics
//!
//! Primitive detections used by both the risk analyzer and the compliance
//! rules, kept in one place so the two cannot drift apart.

use std::collections::BTreeSet;
use std::str::FromStr;

use alloy::primitives::Address;

use crate::trace::{ExecutionTrace, Step};

/// Opcodes that change code identity or execution context
pub const RISKY_OPCODES: [&str; 5] = [
    "DELEGATECALL",
    "CALLCODE",
    "SELFDESTRUCT",
    "CREATE",
    "CREATE2",
];

/// Storage, memory and jump opcodes recorded for forensics only
pub const STACK_MANIPULATION_OPCODES: [&str; 8] =
    ["SSTORE", "SLOAD", "MSTORE", "MSTORE8", "MLOAD", "JUMP", "JUMPI", "JUMPDEST"];

/// Opcodes that move value to another account
pub const VALUE_CALL_OPCODES: [&str; 2] = ["CALL", "CALLCODE"];

pub fn is_risky_opcode(op: &str) -> bool {
    RISKY_OPCODES.contains(&op)
}

pub fn is_stack_manipulation_opcode(op: &str) -> bool {
    STACK_MANIPULATION_OPCODES.contains(&op)
}

/// Distinct call depths at which `DELEGATECALL` executed
pub fn delegatecall_depths(steps: &[Step]) -> BTreeSet<u64> {
    steps
        .iter()
        .filter(|step| step.op == "DELEGATECALL")
        .map(|step| step.depth)
        .collect()
}

/// More than one distinct `DELEGATECALL` depth
pub fn reentrancy_suspected(depths: &BTreeSet<u64>) -> bool {
    depths.len() > 1
}

/// Remaining gas jumped by more than `ratio` relative to the previous step
///
/// A zero previous value has no meaningful ratio and never counts.
pub fn is_gas_spike(previous: u64, current: u64, ratio: f64) -> bool {
    previous > 0 && (current as f64) / (previous as f64) > ratio
}

/// Trace-level gas used, falling back to the last step's gas value
pub fn total_gas(trace: &ExecutionTrace) -> u64 {
    trace
        .gas_used
        .or_else(|| trace.struct_logs.last().map(|step| step.gas))
        .unwrap_or(0)
}

/// Size in bytes of the hex-encoded return value
pub fn return_data_len(trace: &ExecutionTrace) -> usize {
    trace
        .return_value
        .as_deref()
        .map(|hex| hex.strip_prefix("0x").unwrap_or(hex).len().div_ceil(2))
        .unwrap_or(0)
}

/// Interpret a stack word as an address using its low 20 bytes
pub fn address_from_stack_word(word: &str) -> Option<Address> {
    let digits = word.strip_prefix("0x").unwrap_or(word);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let tail = if digits.len() > 40 { &digits[digits.len() - 40..] } else { digits };
    Address::from_str(&format!("{:0>40}", tail)).ok()
}

/// Recipient of a `CALL`/`CALLCODE`: the second word from the top of the stack
pub fn call_recipient(step: &Step) -> Option<Address> {
    step.stack_from_top(1).and_then(address_from_stack_word)
}

/// Sorted distinct risky opcodes in a trace
pub fn distinct_risky_opcodes(steps: &[Step]) -> BTreeSet<&str> {
    steps
        .iter()
        .map(|step| step.op.as_str())
        .filter(|op| is_risky_opcode(op))
        .collect()
}
