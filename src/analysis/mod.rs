//! Statistical comparison of experiment groups.
//!
//! Works on stored [`TaskResult`]s: per-group averages ([`GroupMetrics`]),
//! headline comparisons ([`GroupComparison`]) and per-metric Welch t-tests
//! with Cohen's d ([`TTestResult`]). Only completed results take part.

mod group;
mod stats;

pub use group::{compare_groups, BetterGroup, GroupComparison, GroupMetrics};
pub use stats::{
    cohens_d, mean, normal_cdf, std_dev, variance, welch_t_test, EffectSize, StatWarning,
    WelchTest,
};

use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::error::AnalysisError;
use crate::runner::{ExperimentResult, TaskMetrics, TaskResult, TaskStatus};
use crate::task::ExperimentGroup;

/// Significance threshold for [`TTestResult::significant`].
pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// Per-task metric that can be tested across groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKey {
    TestsPassed,
    HiddenTestsPassed,
    Iterations,
    TotalTokens,
    LinesOfCode,
    CyclomaticComplexity,
    ExecutionTime,
    ContractCoverage,
}

impl MetricKey {
    /// Metrics covered by [`full_analysis`].
    pub const HEADLINE: [MetricKey; 6] = [
        MetricKey::TestsPassed,
        MetricKey::HiddenTestsPassed,
        MetricKey::Iterations,
        MetricKey::TotalTokens,
        MetricKey::LinesOfCode,
        MetricKey::CyclomaticComplexity,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            MetricKey::TestsPassed => "Tests Passed",
            MetricKey::HiddenTestsPassed => "Hidden Tests Passed",
            MetricKey::Iterations => "Iterations",
            MetricKey::TotalTokens => "Total Tokens",
            MetricKey::LinesOfCode => "Lines of Code",
            MetricKey::CyclomaticComplexity => "Cyclomatic Complexity",
            MetricKey::ExecutionTime => "Execution Time",
            MetricKey::ContractCoverage => "Contract Coverage",
        }
    }

    pub fn extract(&self, metrics: &TaskMetrics) -> f64 {
        match self {
            MetricKey::TestsPassed => metrics.tests_passed as f64,
            MetricKey::HiddenTestsPassed => metrics.hidden_tests_passed as f64,
            MetricKey::Iterations => metrics.iterations as f64,
            MetricKey::TotalTokens => metrics.total_tokens as f64,
            MetricKey::LinesOfCode => metrics.lines_of_code as f64,
            MetricKey::CyclomaticComplexity => metrics.cyclomatic_complexity,
            MetricKey::ExecutionTime => metrics.execution_time_seconds,
            MetricKey::ContractCoverage => metrics.contract_coverage,
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// `(t, p, effect size, warning)` for two raw samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub t_statistic: f64,
    pub p_value: f64,
    pub effect_size: f64,
    pub warning: Option<StatWarning>,
}

/// Welch's t-test plus Cohen's d for a control and a treatment sample.
pub fn analyze(control: &[f64], treatment: &[f64]) -> Comparison {
    let test = welch_t_test(control, treatment);
    Comparison {
        t_statistic: test.t_statistic,
        p_value: test.p_value,
        effect_size: cohens_d(control, treatment),
        warning: test.warning,
    }
}

/// Statistical comparison of one metric.
///
/// Infinite t-statistics (perfect separation) serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TTestResult {
    pub metric: MetricKey,
    pub metric_name: String,
    pub control_mean: f64,
    pub treatment_mean: f64,
    pub control_std: f64,
    pub treatment_std: f64,
    pub t_statistic: f64,
    pub p_value: f64,
    pub effect_size: f64,
    pub effect_label: EffectSize,
    pub significant: bool,
    pub warning: Option<String>,
}

fn completed_values(results: &[TaskResult], metric: MetricKey) -> Vec<f64> {
    results
        .iter()
        .filter(|r| r.status == TaskStatus::Completed)
        .map(|r| metric.extract(&r.metrics))
        .collect()
}

/// Tests one metric across the completed results of both groups.
pub fn paired_analysis(
    control: &[TaskResult],
    treatment: &[TaskResult],
    metric: MetricKey,
) -> TTestResult {
    let control_values = completed_values(control, metric);
    let treatment_values = completed_values(treatment, metric);
    let outcome = analyze(&control_values, &treatment_values);

    TTestResult {
        metric,
        metric_name: metric.display_name().to_string(),
        control_mean: mean(&control_values),
        treatment_mean: mean(&treatment_values),
        control_std: std_dev(&control_values),
        treatment_std: std_dev(&treatment_values),
        t_statistic: outcome.t_statistic,
        p_value: outcome.p_value,
        effect_size: outcome.effect_size,
        effect_label: EffectSize::from_d(outcome.effect_size),
        significant: outcome.p_value < SIGNIFICANCE_LEVEL,
        warning: outcome.warning.map(|w| w.to_string()),
    }
}

/// Tests every headline metric.
pub fn full_analysis(control: &[TaskResult], treatment: &[TaskResult]) -> Vec<TTestResult> {
    MetricKey::HEADLINE
        .iter()
        .map(|metric| paired_analysis(control, treatment, *metric))
        .collect()
}

/// Everything derived from one experiment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub experiment_id: String,
    pub control: GroupMetrics,
    pub treatment: GroupMetrics,
    pub comparisons: Vec<GroupComparison>,
    pub tests: Vec<TTestResult>,
}

impl AnalysisReport {
    pub fn from_experiment(experiment: &ExperimentResult) -> Self {
        let control_results = experiment.results(ExperimentGroup::Control);
        let treatment_results = experiment.results(ExperimentGroup::Treatment);
        let control = GroupMetrics::from_results(ExperimentGroup::Control, control_results);
        let treatment = GroupMetrics::from_results(ExperimentGroup::Treatment, treatment_results);
        let comparisons = compare_groups(&control, &treatment);
        Self {
            experiment_id: experiment.experiment_id.clone(),
            control,
            treatment,
            comparisons,
            tests: full_analysis(control_results, treatment_results),
        }
    }
}

/// Loads `results.json` from an experiment directory.
pub fn load_results(results_dir: &Path) -> Result<ExperimentResult, AnalysisError> {
    let path = results_dir.join("results.json");
    if !path.is_file() {
        return Err(AnalysisError::MissingResults(path));
    }
    let content = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(group: ExperimentGroup, id: &str, tokens: u64, passed: u64) -> TaskResult {
        let mut r = TaskResult::start(id, group);
        r.update(|r| {
            r.metrics.total_tokens = tokens;
            r.metrics.tests_passed = passed;
            r.metrics.tests_total = 5;
        });
        r.complete();
        r
    }

    #[test]
    fn test_analyze_contract() {
        let outcome = analyze(&[1.0], &[2.0]);
        assert_eq!(outcome.t_statistic, 0.0);
        assert_eq!(outcome.p_value, 1.0);
        assert_eq!(outcome.effect_size, 0.0);
        assert_eq!(outcome.warning, Some(StatWarning::InsufficientSamples));
    }

    #[test]
    fn test_paired_analysis_filters_completed() {
        let control = vec![
            completed(ExperimentGroup::Control, "a", 100, 1),
            completed(ExperimentGroup::Control, "b", 200, 2),
            completed(ExperimentGroup::Control, "c", 300, 3),
        ];
        let mut failed = TaskResult::start("d", ExperimentGroup::Treatment);
        failed.fail("crash");
        let treatment = vec![
            completed(ExperimentGroup::Treatment, "a", 50, 4),
            completed(ExperimentGroup::Treatment, "b", 150, 5),
            completed(ExperimentGroup::Treatment, "c", 250, 5),
            failed,
        ];

        let tokens = paired_analysis(&control, &treatment, MetricKey::TotalTokens);
        assert_eq!(tokens.control_mean, 200.0);
        assert_eq!(tokens.treatment_mean, 150.0);
        assert!(tokens.t_statistic < 0.0);
        assert!(tokens.warning.is_none());
        assert_eq!(tokens.metric_name, "Total Tokens");

        let results = full_analysis(&control, &treatment);
        assert_eq!(results.len(), 6);
        assert_eq!(results[0].metric, MetricKey::TestsPassed);
        assert!(results[0].effect_size > 0.8);
        assert_eq!(results[0].effect_label, EffectSize::Large);
    }

    #[test]
    fn test_report_from_experiment() {
        let mut experiment = ExperimentResult::new("exp_1", None);
        experiment
            .add_result(completed(ExperimentGroup::Control, "a", 100, 1))
            .unwrap();
        experiment
            .add_result(completed(ExperimentGroup::Treatment, "a", 80, 2))
            .unwrap();
        let report = AnalysisReport::from_experiment(&experiment);
        assert_eq!(report.control.completed_tasks, 1);
        assert_eq!(report.comparisons.len(), 6);
        assert!(report
            .tests
            .iter()
            .all(|t| t.warning.as_deref() == Some("Insufficient samples (n < 2)")));
        assert!(serde_json::to_string(&report).is_ok());
    }

    #[test]
    fn test_load_missing_results() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = load_results(tmp.path()).unwrap_err();
        assert!(matches!(err, AnalysisError::MissingResults(_)));
    }
}
