//! Per-task metrics, task results and experiment results.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ExperimentMetadata;
use crate::conversation::ConversationMetrics;
use crate::error::ExperimentError;
use crate::task::ExperimentGroup;

/// Status of a task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl TaskStatus {
    /// Terminal statuses freeze the result.
    pub fn is_terminal(&self) -> bool {
        match self {
            TaskStatus::Pending | TaskStatus::Running => false,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout => true,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// Flat counters and ratios measured for one task run.
///
/// Pass rates are derived by [`TaskMetrics::test_pass_rate`] and
/// [`TaskMetrics::hidden_test_pass_rate`] and are never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskMetrics {
    pub iterations: u64,
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    /// False when token counts come from the characters-per-token estimate.
    pub token_count_exact: bool,
    pub execution_time_seconds: f64,

    pub tests_passed: u64,
    pub tests_failed: u64,
    pub tests_total: u64,
    pub hidden_tests_passed: u64,
    pub hidden_tests_total: u64,
    /// Verdict of the container evaluation, when it ran.
    pub resolved: Option<bool>,

    pub guard_errors: u64,
    pub guard_warnings: u64,
    pub contract_coverage: f64,
    pub has_contracts: bool,

    pub lines_of_code: u64,
    pub cyclomatic_complexity: f64,

    pub total_tool_calls: u64,
    pub mcp_calls: u64,
    pub skill_calls: u64,
    pub tool_breakdown: BTreeMap<String, u64>,
    pub assistant_messages: u64,
    pub user_messages: u64,
    pub has_checkin: bool,
    pub has_final: bool,
    pub final_status: Option<String>,
}

impl TaskMetrics {
    /// Fraction of visible tests passed, `0.0` when none ran.
    pub fn test_pass_rate(&self) -> f64 {
        ratio(self.tests_passed, self.tests_total)
    }

    /// Fraction of hidden tests passed, `0.0` when none ran.
    pub fn hidden_test_pass_rate(&self) -> f64 {
        ratio(self.hidden_tests_passed, self.hidden_tests_total)
    }

    /// Replaces heuristic estimates with counts recovered from the transcript.
    pub fn apply_conversation(&mut self, conversation: &ConversationMetrics) {
        self.input_tokens = conversation.input_tokens;
        self.output_tokens = conversation.output_tokens;
        self.cache_creation_tokens = conversation.cache_creation_tokens;
        self.cache_read_tokens = conversation.cache_read_tokens;
        self.total_tokens = conversation.total_tokens();
        self.token_count_exact = true;
        self.iterations = conversation.assistant_messages;
        self.total_tool_calls = conversation.total_tool_calls();
        self.mcp_calls = conversation.mcp_calls;
        self.skill_calls = conversation.skill_calls;
        self.tool_breakdown = conversation.tool_calls.clone();
        self.assistant_messages = conversation.assistant_messages;
        self.user_messages = conversation.user_messages;
        self.has_checkin = conversation.has_checkin;
        self.has_final = conversation.has_final;
        self.final_status = conversation.final_status.clone();
    }
}

/// `passed / total`, clamped to `[0, 1]`, `0.0` on an empty denominator.
pub fn ratio(passed: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (passed as f64 / total as f64).clamp(0.0, 1.0)
    }
}

/// Result of running one task in one group.
///
/// Created in `running` status; once a terminal status is assigned the
/// record no longer accepts changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub group: ExperimentGroup,
    pub status: TaskStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Relative path -> content of source files present after the run.
    #[serde(default)]
    pub generated_files: BTreeMap<String, String>,
    #[serde(default)]
    pub metrics: TaskMetrics,
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl TaskResult {
    pub fn start(task_id: impl Into<String>, group: ExperimentGroup) -> Self {
        Self {
            task_id: task_id.into(),
            group,
            status: TaskStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            generated_files: BTreeMap::new(),
            metrics: TaskMetrics::default(),
            transcript: String::new(),
            error_message: None,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies `update` unless the result is already frozen.
    pub fn update(&mut self, update: impl FnOnce(&mut Self)) {
        if self.is_frozen() {
            warn!(task_id = %self.task_id, status = %self.status, "Ignoring update to finished result");
            return;
        }
        update(self);
    }

    pub fn complete(&mut self) {
        self.finish(TaskStatus::Completed, None);
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.finish(TaskStatus::Failed, Some(error.into()));
    }

    pub fn time_out(&mut self, message: impl Into<String>) {
        self.finish(TaskStatus::Timeout, Some(message.into()));
    }

    fn finish(&mut self, status: TaskStatus, error: Option<String>) {
        self.update(|result| {
            let end = Utc::now();
            result.end_time = Some(end);
            result.metrics.execution_time_seconds =
                (end - result.start_time).num_milliseconds().max(0) as f64 / 1000.0;
            if error.is_some() {
                result.error_message = error;
            }
            result.status = status;
        });
    }

    /// Copy of this result with transcript-derived counts applied.
    ///
    /// Used when re-deriving metrics for results that are already frozen.
    pub fn with_conversation(&self, conversation: &ConversationMetrics) -> Self {
        let mut updated = self.clone();
        updated.metrics.apply_conversation(conversation);
        updated
    }

    /// Key identifying the result inside an experiment.
    pub fn key(&self) -> (ExperimentGroup, &str) {
        (self.group, &self.task_id)
    }
}

/// Aggregate result of one experiment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub experiment_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub control_results: Vec<TaskResult>,
    #[serde(default)]
    pub treatment_results: Vec<TaskResult>,
    pub config_snapshot: Option<ExperimentMetadata>,
}

impl ExperimentResult {
    pub fn new(experiment_id: impl Into<String>, config_snapshot: Option<ExperimentMetadata>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            start_time: Utc::now(),
            end_time: None,
            control_results: Vec::new(),
            treatment_results: Vec::new(),
            config_snapshot,
        }
    }

    /// Experiment id derived from the local start time, e.g. `exp_20240101_120000`.
    pub fn generate_id() -> String {
        chrono::Local::now().format("exp_%Y%m%d_%H%M%S").to_string()
    }

    /// Appends a result; a second result for the same (group, task) is rejected.
    pub fn add_result(&mut self, result: TaskResult) -> Result<(), ExperimentError> {
        let results = match result.group {
            ExperimentGroup::Control => &mut self.control_results,
            ExperimentGroup::Treatment => &mut self.treatment_results,
        };
        if results.iter().any(|r| r.task_id == result.task_id) {
            return Err(ExperimentError::DuplicateResult {
                group: result.group.to_string(),
                task_id: result.task_id,
            });
        }
        results.push(result);
        Ok(())
    }

    pub fn results(&self, group: ExperimentGroup) -> &[TaskResult] {
        match group {
            ExperimentGroup::Control => &self.control_results,
            ExperimentGroup::Treatment => &self.treatment_results,
        }
    }

    pub fn all_results(&self) -> impl Iterator<Item = &TaskResult> {
        self.control_results.iter().chain(self.treatment_results.iter())
    }

    /// Task ids present in both groups, sorted.
    pub fn paired_task_ids(&self) -> Vec<String> {
        let control: BTreeSet<&str> = self.control_results.iter().map(|r| r.task_id.as_str()).collect();
        self.treatment_results
            .iter()
            .map(|r| r.task_id.as_str())
            .filter(|id| control.contains(id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn finish(&mut self) {
        self.end_time = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_rates_zero_denominator() {
        let metrics = TaskMetrics {
            tests_passed: 7,
            hidden_tests_passed: 3,
            ..Default::default()
        };
        assert_eq!(metrics.test_pass_rate(), 0.0);
        assert_eq!(metrics.hidden_test_pass_rate(), 0.0);
    }

    #[test]
    fn test_pass_rates() {
        let metrics = TaskMetrics {
            tests_passed: 3,
            tests_total: 4,
            hidden_tests_passed: 5,
            hidden_tests_total: 4,
            ..Default::default()
        };
        assert_eq!(metrics.test_pass_rate(), 0.75);
        assert_eq!(metrics.hidden_test_pass_rate(), 1.0);
    }

    #[test]
    fn test_result_frozen_after_terminal_status() {
        let mut result = TaskResult::start("t1", ExperimentGroup::Control);
        assert_eq!(result.status, TaskStatus::Running);
        result.update(|r| r.metrics.iterations = 4);
        result.complete();
        assert_eq!(result.status, TaskStatus::Completed);
        assert!(result.end_time.is_some());

        result.fail("late error");
        result.update(|r| r.metrics.iterations = 99);
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.metrics.iterations, 4);
        assert!(result.error_message.is_none());
    }

    #[test]
    fn test_timeout_status_keeps_message() {
        let mut result = TaskResult::start("t1", ExperimentGroup::Treatment);
        result.time_out("Timeout after 600 seconds");
        assert_eq!(result.status, TaskStatus::Timeout);
        assert_eq!(result.error_message.as_deref(), Some("Timeout after 600 seconds"));
    }

    #[test]
    fn test_duplicate_result_rejected() {
        let mut experiment = ExperimentResult::new("exp_test", None);
        experiment
            .add_result(TaskResult::start("t1", ExperimentGroup::Control))
            .unwrap();
        experiment
            .add_result(TaskResult::start("t1", ExperimentGroup::Treatment))
            .unwrap();
        let err = experiment
            .add_result(TaskResult::start("t1", ExperimentGroup::Control))
            .unwrap_err();
        assert!(matches!(err, ExperimentError::DuplicateResult { .. }));
        assert_eq!(experiment.paired_task_ids(), vec!["t1".to_string()]);
    }

    #[test]
    fn test_result_round_trip() {
        let mut result = TaskResult::start("t1", ExperimentGroup::Treatment);
        result.update(|r| {
            r.metrics.total_tokens = 1234;
            r.metrics.cache_read_tokens = 55;
            r.metrics.contract_coverage = 0.5;
            r.metrics.has_contracts = true;
            r.metrics.final_status = Some("PASS".to_string());
            r.metrics.tool_breakdown.insert("Edit".to_string(), 3);
            r.generated_files.insert("src/core/a.py".to_string(), "x = 1\n".to_string());
        });
        result.complete();

        let json = serde_json::to_string(&result).unwrap();
        let back: TaskResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
        assert!(json.contains("\"status\":\"completed\""));
        assert!(json.contains("\"group\":\"treatment\""));
    }

    #[test]
    fn test_experiment_id_format() {
        let id = ExperimentResult::generate_id();
        assert!(id.starts_with("exp_"));
        assert_eq!(id.len(), "exp_20240101_120000".len());
    }
}
