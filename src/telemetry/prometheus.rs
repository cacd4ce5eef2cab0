//! Prometheus metric registration and text export.

use std::sync::OnceLock;

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

/// Registry holding every contract-bench metric.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Agent runs, labeled by group and terminal status.
pub static AGENT_RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Agent wall-clock time in seconds, labeled by group and execution mode.
pub static AGENT_RUN_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Scripted answers sent to interactive prompts, labeled by prompt pattern.
pub static AUTO_RESPONSES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Individual test outcomes, labeled by run kind and outcome.
pub static TESTS_EXECUTED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Repository cache operations, labeled by operation and outcome.
pub static CACHE_OPERATIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Transcript lookups after agent runs, labeled by outcome.
pub static TRANSCRIPTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Creates and registers all metrics.
///
/// Safe to call more than once; later calls leave the first registration in
/// place.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }
    let registry = Registry::new();

    let agent_runs = CounterVec::new(
        Opts::new("contract_bench_agent_runs_total", "Agent runs by group and status"),
        &["group", "status"],
    )?;
    let agent_duration = HistogramVec::new(
        HistogramOpts::new("contract_bench_agent_run_duration_seconds", "Agent run duration in seconds")
            .buckets(vec![10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["group", "mode"],
    )?;
    let auto_responses = CounterVec::new(
        Opts::new("contract_bench_auto_responses_total", "Scripted answers to interactive prompts"),
        &["pattern"],
    )?;
    let tests_executed = CounterVec::new(
        Opts::new("contract_bench_tests_executed_total", "Test outcomes observed during collection"),
        &["kind", "outcome"],
    )?;
    let cache_operations = CounterVec::new(
        Opts::new("contract_bench_cache_operations_total", "Repository cache operations"),
        &["operation", "outcome"],
    )?;
    let transcripts = CounterVec::new(
        Opts::new("contract_bench_transcripts_total", "Transcript lookups after agent runs"),
        &["outcome"],
    )?;

    registry.register(Box::new(agent_runs.clone()))?;
    registry.register(Box::new(agent_duration.clone()))?;
    registry.register(Box::new(auto_responses.clone()))?;
    registry.register(Box::new(tests_executed.clone()))?;
    registry.register(Box::new(cache_operations.clone()))?;
    registry.register(Box::new(transcripts.clone()))?;

    // A concurrent initializer may have won; its metrics stay authoritative.
    let _ = REGISTRY.set(registry);
    let _ = AGENT_RUNS_TOTAL.set(agent_runs);
    let _ = AGENT_RUN_DURATION.set(agent_duration);
    let _ = AUTO_RESPONSES_TOTAL.set(auto_responses);
    let _ = TESTS_EXECUTED_TOTAL.set(tests_executed);
    let _ = CACHE_OPERATIONS_TOTAL.set(cache_operations);
    let _ = TRANSCRIPTS_TOTAL.set(transcripts);

    tracing::debug!("Prometheus metrics initialized");
    Ok(())
}

/// All registered metrics in the Prometheus text exposition format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized\n".to_string();
    };

    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut buffer) {
        return format!("# Error encoding metrics: {e}\n");
    }
    String::from_utf8(buffer).unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {e}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
        assert!(!export_metrics().starts_with("# Error"));
    }
}
