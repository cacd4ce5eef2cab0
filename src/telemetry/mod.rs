//! Run telemetry.
//!
//! Counters and histograms live in a process-wide Prometheus registry
//! (`prometheus`). The `record_*` helpers are no-ops until [`init_metrics`]
//! has run, so library code can call them unconditionally. The registry is
//! dumped to `metrics.prom` next to each experiment's results.

pub mod prometheus;

pub use self::prometheus::{
    export_metrics, init_metrics, AGENT_RUNS_TOTAL, AGENT_RUN_DURATION, AUTO_RESPONSES_TOTAL,
    CACHE_OPERATIONS_TOTAL, REGISTRY, TESTS_EXECUTED_TOTAL, TRANSCRIPTS_TOTAL,
};

pub fn record_agent_run(group: &str, status: &str, mode: &str, duration_secs: f64) {
    if let Some(runs) = AGENT_RUNS_TOTAL.get() {
        runs.with_label_values(&[group, status]).inc();
    }
    if let Some(duration) = AGENT_RUN_DURATION.get() {
        duration.with_label_values(&[group, mode]).observe(duration_secs);
    }
}

pub fn record_auto_response(pattern: &str) {
    if let Some(responses) = AUTO_RESPONSES_TOTAL.get() {
        responses.with_label_values(&[pattern]).inc();
    }
}

/// Adds `passed` and `failed` observations for one kind of test run.
pub fn record_tests_executed(kind: &str, passed: u32, failed: u32) {
    if let Some(tests) = TESTS_EXECUTED_TOTAL.get() {
        tests.with_label_values(&[kind, "passed"]).inc_by(f64::from(passed));
        tests.with_label_values(&[kind, "failed"]).inc_by(f64::from(failed));
    }
}

pub fn record_cache_operation(operation: &str, success: bool) {
    if let Some(ops) = CACHE_OPERATIONS_TOTAL.get() {
        let outcome = if success { "success" } else { "failure" };
        ops.with_label_values(&[operation, outcome]).inc();
    }
}

pub fn record_transcript(found: bool) {
    if let Some(transcripts) = TRANSCRIPTS_TOTAL.get() {
        transcripts
            .with_label_values(&[if found { "found" } else { "missing" }])
            .inc();
    }
}
