//! Latency benchmarks for the CPU-bound stages
//!
//! Trace analysis and rule evaluation run inline on every traced transaction,
//! so they should stay well below the cost of the trace request itself.

use alloy::primitives::{address, U256};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};

use tracewatch_monitor::analyzer::{TraceAnalyzer, DEFAULT_HIGH_GAS_THRESHOLD};
use tracewatch_monitor::compliance::{ComplianceConfig, ComplianceEngine};
use tracewatch_monitor::decoder::RawTransaction;
use tracewatch_monitor::filter::TokenFilter;
use tracewatch_monitor::trace::ExecutionTrace;

const OPS: [&str; 8] = [
    "PUSH1",
    "MSTORE",
    "SLOAD",
    "CALL",
    "JUMPI",
    "DELEGATECALL",
    "SSTORE",
    "RETURN",
];

/// Synthetic trace with `steps` opcodes cycling through a realistic mix
fn synthetic_trace(steps: usize) -> Value {
    let logs: Vec<Value> = (0..steps)
        .map(|i| {
            json!({
                "pc": i,
                "op": OPS[i % OPS.len()],
                "gas": 10_000_000u64.saturating_sub(i as u64 * 3),
                "depth": 1 + (i / 500) as u64,
                "stack": [
                    "0x0",
                    "0x000000000000000000000000f39fd6e51aad88f6f4ce6ab8827279cfffb92266",
                    format!("{:#x}", i)
                ]
            })
        })
        .collect();
    json!({ "gas": 3_500_000, "returnValue": "00".repeat(64), "structLogs": logs })
}

fn sample_tx() -> RawTransaction {
    RawTransaction {
        hash: format!("0x{}", "ab".repeat(32)),
        from: Some(address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266")),
        to: Some(address!("6c3ea9036406852006290770BEdFcAbA0e23A0e8")),
        input: Some(format!(
            "0xa9059cbb000000000000000000000000{}{:064x}",
            "7a250d5630b4cf539739df2c5dacb4c659f2488d", 1_000_000u64
        )),
        value: U256::ZERO,
        block_number: Some(19_000_000),
    }
}

/// Benchmark trace shape validation
fn bench_parse_trace(c: &mut Criterion) {
    let raw = synthetic_trace(5_000);

    c.bench_function("parse_trace_5k_steps", |b| {
        b.iter(|| black_box(ExecutionTrace::from_json(black_box(&raw)).unwrap()))
    });
}

/// Benchmark the single-pass analyzer at several trace sizes
fn bench_analyze_trace(c: &mut Criterion) {
    let analyzer = TraceAnalyzer::default();
    let mut group = c.benchmark_group("analyze_trace");

    for steps in [100usize, 1_000, 10_000] {
        let trace = ExecutionTrace::from_json(&synthetic_trace(steps)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(steps), &trace, |b, trace| {
            b.iter(|| black_box(analyzer.analyze(black_box(trace))))
        });
    }

    group.finish();
}

/// Benchmark the full rule set
fn bench_evaluate_rules(c: &mut Criterion) {
    let engine = ComplianceEngine::new(
        &ComplianceConfig {
            blacklist: vec![address!("8589427373D6D84E98730D7795D8f6f8731FDA16")],
            ..Default::default()
        },
        DEFAULT_HIGH_GAS_THRESHOLD,
    );
    let trace = ExecutionTrace::from_json(&synthetic_trace(5_000)).unwrap();
    let tx = sample_tx();

    c.bench_function("evaluate_rules_5k_steps", |b| {
        b.iter(|| black_box(engine.evaluate(black_box(&trace), black_box(&tx))))
    });
}

/// Benchmark token involvement filtering
fn bench_filter(c: &mut Criterion) {
    let filter = TokenFilter::default();
    let tx = sample_tx();

    c.bench_function("filter_classify", |b| b.iter(|| black_box(filter.classify(black_box(&tx)))));
}

criterion_group!(
    benches,
    bench_parse_trace,
    bench_analyze_trace,
    bench_evaluate_rules,
    bench_filter
);
criterion_main!(benches);
