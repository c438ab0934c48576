//! Execution Traces
//!
//! Opcode-level traces as produced by `debug_traceTransaction` with the
//! default struct logger, and the fetcher that retrieves and validates them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::decoder::{is_valid_tx_hash, parse_quantity};
use crate::retry::{with_retry, RetryPolicy};
use crate::rpc::ChainRpc;

/// JSON-RPC method used to fetch a transaction trace
pub const TRACE_METHOD: &str = "debug_traceTransaction";

/// Why a trace payload could not be used
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceShapeError {
    #[error("trace is not a JSON object")]
    NotAnObject,

    #[error("structLogs is missing or not an array")]
    StructLogsNotArray,

    #[error("structLogs is empty")]
    EmptyStructLogs,

    #[error("step {index} is malformed: {reason}")]
    MalformedStep { index: usize, reason: &'static str },
}

/// One executed opcode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub pc: u64,
    pub op: String,
    /// Gas remaining before the opcode executes
    pub gas: u64,
    pub depth: u64,
    /// Stack words bottom first, so the top of the stack is the last element
    pub stack: Vec<String>,
}

impl Step {
    fn from_json(index: usize, value: &Value) -> Result<Self, TraceShapeError> {
        let obj = value.as_object().ok_or(TraceShapeError::MalformedStep {
            index,
            reason: "not an object",
        })?;
        let op = obj
            .get("op")
            .and_then(Value::as_str)
            .ok_or(TraceShapeError::MalformedStep {
                index,
                reason: "missing op",
            })?;

        // Stack positions are counted from the top; no word may be dropped.
        let stack = match obj.get("stack").and_then(Value::as_array) {
            Some(words) => words
                .iter()
                .map(|word| word.as_str().map(str::to_string))
                .collect::<Option<Vec<String>>>()
                .ok_or(TraceShapeError::MalformedStep {
                    index,
                    reason: "non-string stack word",
                })?,
            None => Vec::new(),
        };

        Ok(Step {
            pc: quantity_field(obj, "pc"),
            op: op.to_string(),
            gas: quantity_field(obj, "gas"),
            depth: quantity_field(obj, "depth"),
            stack,
        })
    }

    /// Stack word `n` positions below the top (0 = top)
    pub fn stack_from_top(&self, n: usize) -> Option<&str> {
        let len = self.stack.len();
        if n >= len {
            return None;
        }
        self.stack.get(len - 1 - n).map(String::as_str)
    }
}

fn quantity_field(obj: &Map<String, Value>, key: &str) -> u64 {
    obj.get(key).and_then(parse_quantity).unwrap_or(0)
}

/// A validated execution trace; `struct_logs` is never empty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionTrace {
    pub gas_used: Option<u64>,
    pub struct_logs: Vec<Step>,
    pub return_value: Option<String>,
}

impl ExecutionTrace {
    /// Validate and convert a raw trace payload
    pub fn from_json(value: &Value) -> Result<Self, TraceShapeError> {
        let obj = value.as_object().ok_or(TraceShapeError::NotAnObject)?;
        let logs = obj
            .get("structLogs")
            .and_then(Value::as_array)
            .ok_or(TraceShapeError::StructLogsNotArray)?;
        if logs.is_empty() {
            return Err(TraceShapeError::EmptyStructLogs);
        }

        let struct_logs = logs
            .iter()
            .enumerate()
            .map(|(index, step)| Step::from_json(index, step))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ExecutionTrace {
            gas_used: obj.get("gas").or_else(|| obj.get("gasUsed")).and_then(parse_quantity),
            struct_logs,
            return_value: obj.get("returnValue").and_then(Value::as_str).map(str::to_string),
        })
    }

    pub fn steps(&self) -> &[Step] {
        &self.struct_logs
    }
}

/// Result of a trace lookup; every non-`Available` variant is a skip, not an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceLookup {
    Available(ExecutionTrace),
    /// Hash failed validation; no request was sent
    InvalidHash,
    /// The node answered with something that is not a usable trace
    Malformed(TraceShapeError),
    /// The node could not be reached after retrying
    Unreachable(String),
}

impl TraceLookup {
    pub fn into_trace(self) -> Option<ExecutionTrace> {
        match self {
            TraceLookup::Available(trace) => Some(trace),
            _ => None,
        }
    }
}

/// Fetches opcode-level traces for single transactions
#[derive(Clone)]
pub struct TraceFetcher {
    rpc: Arc<dyn ChainRpc>,
    retry: RetryPolicy,
}

impl TraceFetcher {
    /// Network failures are retried once regardless of the general policy
    pub fn new(rpc: Arc<dyn ChainRpc>, retry: RetryPolicy) -> Self {
        Self {
            rpc,
            retry: retry.with_max_retries(1),
        }
    }

    /// Fetch and validate the trace of `hash`
    pub async fn fetch(&self, hash: &str) -> TraceLookup {
        if !is_valid_tx_hash(hash) {
            warn!("Refusing to trace malformed transaction hash {:?}", hash);
            return TraceLookup::InvalidHash;
        }

        let rpc = self.rpc.as_ref();
        let params = json!([hash, {}]);
        let response = with_retry(&self.retry, TRACE_METHOD, || {
            rpc.send_raw(TRACE_METHOD, params.clone())
        })
        .await;

        match response {
            Ok(value) => match ExecutionTrace::from_json(&value) {
                Ok(trace) => {
                    debug!("Trace for {} has {} steps", hash, trace.struct_logs.len());
                    TraceLookup::Available(trace)
                }
                Err(e) => {
                    warn!("Trace for {} unavailable: {}", hash, e);
                    TraceLookup::Malformed(e)
                }
            },
            Err(e) => {
                warn!("Trace for {} unavailable after retry: {}", hash, e);
                TraceLookup::Unreachable(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{MockChainRpc, RpcError};

    fn valid_hash() -> String {
        format!("0x{}", "ab".repeat(32))
    }

    fn sample_trace() -> Value {
        json!({
            "gas": 53000,
            "failed": false,
            "returnValue": "0x01",
            "structLogs": [
                { "pc": 0, "op": "PUSH1", "gas": 79000, "gasCost": 3, "depth": 1, "stack": [] },
                { "pc": 2, "op": "CALL", "gas": "0x1348c", "depth": 1, "stack": ["0x0", "0xabc", "0x5208"] }
            ]
        })
    }

    // ==================== ExecutionTrace parsing tests ====================

    #[test]
    fn test_parse_valid_trace() {
        let trace = ExecutionTrace::from_json(&sample_trace()).unwrap();
        assert_eq!(trace.gas_used, Some(53000));
        assert_eq!(trace.return_value.as_deref(), Some("0x01"));
        assert_eq!(trace.steps().len(), 2);
        assert_eq!(trace.steps()[1].op, "CALL");
        assert_eq!(trace.steps()[1].gas, 0x1348c);
    }

    #[test]
    fn test_parse_rejects_non_array_struct_logs() {
        let value = json!({ "structLogs": "not-an-array" });
        assert_eq!(ExecutionTrace::from_json(&value), Err(TraceShapeError::StructLogsNotArray));
    }

    #[test]
    fn test_parse_rejects_missing_struct_logs() {
        assert_eq!(
            ExecutionTrace::from_json(&json!({ "gas": 1 })),
            Err(TraceShapeError::StructLogsNotArray)
        );
        assert_eq!(ExecutionTrace::from_json(&json!(null)), Err(TraceShapeError::NotAnObject));
    }

    #[test]
    fn test_parse_rejects_empty_struct_logs() {
        let value = json!({ "structLogs": [] });
        assert_eq!(ExecutionTrace::from_json(&value), Err(TraceShapeError::EmptyStructLogs));
    }

    #[test]
    fn test_parse_rejects_step_without_op() {
        let value = json!({ "structLogs": [{ "pc": 0, "gas": 10 }] });
        assert!(matches!(
            ExecutionTrace::from_json(&value),
            Err(TraceShapeError::MalformedStep { index: 0, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_non_string_stack_word() {
        let value = json!({
            "structLogs": [
                { "pc": 0, "op": "PUSH1", "gas": 10, "depth": 1, "stack": [] },
                { "pc": 2, "op": "CALL", "gas": 9, "depth": 1, "stack": ["0x0", 42, "0x5208"] }
            ]
        });
        assert_eq!(
            ExecutionTrace::from_json(&value),
            Err(TraceShapeError::MalformedStep {
                index: 1,
                reason: "non-string stack word"
            })
        );
    }

    #[test]
    fn test_stack_from_top() {
        let trace = ExecutionTrace::from_json(&sample_trace()).unwrap();
        let call = &trace.steps()[1];
        assert_eq!(call.stack_from_top(0), Some("0x5208"));
        assert_eq!(call.stack_from_top(1), Some("0xabc"));
        assert_eq!(call.stack_from_top(3), None);
    }

    // ==================== TraceFetcher tests ====================

    #[tokio::test]
    async fn test_invalid_hash_skips_remote_call() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_send_raw().never();

        let fetcher = TraceFetcher::new(Arc::new(rpc), RetryPolicy::new(3, 1));
        assert_eq!(fetcher.fetch("0x1234").await, TraceLookup::InvalidHash);
    }

    #[tokio::test]
    async fn test_fetch_valid_trace() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_send_raw()
            .withf(|method, params| method.to_string() == TRACE_METHOD && params[1] == json!({}))
            .times(1)
            .returning(|_, _| Ok(sample_trace()));

        let fetcher = TraceFetcher::new(Arc::new(rpc), RetryPolicy::new(3, 1));
        let trace = fetcher.fetch(&valid_hash()).await.into_trace().unwrap();
        assert_eq!(trace.steps().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_trace_is_unavailable_not_retried() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_send_raw()
            .times(1)
            .returning(|_, _| Ok(json!({ "structLogs": "not-an-array" })));

        let fetcher = TraceFetcher::new(Arc::new(rpc), RetryPolicy::new(3, 1));
        assert_eq!(
            fetcher.fetch(&valid_hash()).await,
            TraceLookup::Malformed(TraceShapeError::StructLogsNotArray)
        );
    }

    #[tokio::test]
    async fn test_network_failure_retried_once() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_send_raw()
            .times(2)
            .returning(|_, _| Err(RpcError::Transport("connection reset".to_string())));

        let fetcher = TraceFetcher::new(Arc::new(rpc), RetryPolicy::new(5, 1));
        assert!(matches!(fetcher.fetch(&valid_hash()).await, TraceLookup::Unreachable(_)));
    }
}
