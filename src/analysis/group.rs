//! Group-level aggregation and comparison.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::runner::{TaskMetrics, TaskResult, TaskStatus};
use crate::task::ExperimentGroup;

/// Averages over the completed results of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMetrics {
    pub group: ExperimentGroup,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub timeout_tasks: usize,

    pub avg_test_pass_rate: f64,
    pub avg_hidden_test_pass_rate: f64,

    pub avg_iterations: f64,
    pub avg_tokens: f64,
    pub avg_execution_time: f64,

    pub avg_lines_of_code: f64,
    pub avg_complexity: f64,

    pub avg_contract_coverage: f64,
    pub contracts_used_rate: f64,
    pub avg_guard_errors: f64,
    pub avg_guard_warnings: f64,
}

impl GroupMetrics {
    /// Aggregates `results`; every average is `0.0` when nothing completed.
    pub fn from_results(group: ExperimentGroup, results: &[TaskResult]) -> Self {
        let count = |status: TaskStatus| results.iter().filter(|r| r.status == status).count();
        let completed: Vec<_> = results
            .iter()
            .filter(|r| r.status == TaskStatus::Completed)
            .map(|r| &r.metrics)
            .collect();

        Self {
            group,
            total_tasks: results.len(),
            completed_tasks: completed.len(),
            failed_tasks: count(TaskStatus::Failed),
            timeout_tasks: count(TaskStatus::Timeout),
            avg_test_pass_rate: average(&completed, |m| m.test_pass_rate()),
            avg_hidden_test_pass_rate: average(&completed, |m| m.hidden_test_pass_rate()),
            avg_iterations: average(&completed, |m| m.iterations as f64),
            avg_tokens: average(&completed, |m| m.total_tokens as f64),
            avg_execution_time: average(&completed, |m| m.execution_time_seconds),
            avg_lines_of_code: average(&completed, |m| m.lines_of_code as f64),
            avg_complexity: average(&completed, |m| m.cyclomatic_complexity),
            avg_contract_coverage: average(&completed, |m| m.contract_coverage),
            contracts_used_rate: average(&completed, |m| if m.has_contracts { 1.0 } else { 0.0 }),
            avg_guard_errors: average(&completed, |m| m.guard_errors as f64),
            avg_guard_warnings: average(&completed, |m| m.guard_warnings as f64),
        }
    }

    /// Fraction of tasks that completed, `0.0` for an empty group.
    pub fn completion_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            0.0
        } else {
            self.completed_tasks as f64 / self.total_tasks as f64
        }
    }
}

fn average(metrics: &[&TaskMetrics], value: impl Fn(&TaskMetrics) -> f64) -> f64 {
    if metrics.is_empty() {
        return 0.0;
    }
    metrics.iter().map(|m| value(m)).sum::<f64>() / metrics.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetterGroup {
    Control,
    Treatment,
    Tie,
}

impl fmt::Display for BetterGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetterGroup::Control => write!(f, "control"),
            BetterGroup::Treatment => write!(f, "treatment"),
            BetterGroup::Tie => write!(f, "tie"),
        }
    }
}

/// One metric compared across the two groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupComparison {
    pub metric_name: String,
    pub control_value: f64,
    pub treatment_value: f64,
    /// `treatment - control`.
    pub difference: f64,
    /// Relative change in percent, `0.0` when the control value is zero.
    pub percent_change: f64,
    pub better_group: BetterGroup,
}

impl GroupComparison {
    pub fn new(
        metric_name: impl Into<String>,
        control_value: f64,
        treatment_value: f64,
        higher_is_better: bool,
    ) -> Self {
        let difference = treatment_value - control_value;
        let percent_change = if control_value != 0.0 {
            difference / control_value * 100.0
        } else {
            0.0
        };
        let improvement = if higher_is_better { difference } else { -difference };
        let better_group = if improvement > 0.0 {
            BetterGroup::Treatment
        } else if improvement < 0.0 {
            BetterGroup::Control
        } else {
            BetterGroup::Tie
        };
        Self {
            metric_name: metric_name.into(),
            control_value,
            treatment_value,
            difference,
            percent_change,
            better_group,
        }
    }
}

/// Compares the headline metrics of two groups.
pub fn compare_groups(control: &GroupMetrics, treatment: &GroupMetrics) -> Vec<GroupComparison> {
    let rows: [(&str, fn(&GroupMetrics) -> f64, bool); 6] = [
        ("Test Pass Rate", |g| g.avg_test_pass_rate, true),
        ("Hidden Test Pass Rate", |g| g.avg_hidden_test_pass_rate, true),
        ("Iterations (lower is better)", |g| g.avg_iterations, false),
        ("Token Usage (lower is better)", |g| g.avg_tokens, false),
        ("Lines of Code", |g| g.avg_lines_of_code, false),
        ("Complexity (lower is better)", |g| g.avg_complexity, false),
    ];
    rows.iter()
        .map(|(name, value, higher_is_better)| {
            GroupComparison::new(*name, value(control), value(treatment), *higher_is_better)
        })
        .collect()
}
