//! Post-run metrics collection.
//!
//! After the agent finishes, [`MetricsCollector::collect`] runs the task's
//! tests, measures the produced code and, for the treatment group, scans for
//! contracts and runs the guard tool. Every step degrades to default values
//! on failure; collection itself never fails.

pub mod capabilities;
pub mod code;
pub mod container;
pub mod contracts;
pub mod guard;
pub mod test_runner;
pub mod tokens;

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::config::BenchmarkConfig;
use crate::conversation::ConversationMetrics;
use crate::runner::TaskMetrics;
use crate::task::{ExperimentGroup, ExternalIssueMetadata, Task};
use crate::workspace::provisioner::{REPO_DIR, TEST_FILE};

pub use capabilities::Capabilities;
pub use code::{collect_generated_files, CodeMetrics};
pub use container::{ContainerEvaluator, ContainerVerdict};
pub use contracts::ContractStats;
pub use guard::GuardReport;
pub use test_runner::{TestCounts, TestRunner};
pub use tokens::{TokenCount, TokenCounter};

/// Held-out test suite location, relative to the workspace.
pub const HIDDEN_TEST_FILE: &str = "tests/test_hidden.py";

/// Everything the collector needs to know about one finished run.
#[derive(Debug, Clone, Copy)]
pub struct CollectInput<'a> {
    pub workspace: &'a Path,
    pub task: &'a Task,
    pub group: ExperimentGroup,
    /// Raw agent output, used only for estimates.
    pub transcript: &'a str,
    /// Parsed transcript, preferred over estimates when present.
    pub conversation: Option<&'a ConversationMetrics>,
}

impl CollectInput<'_> {
    /// Directory holding the code under measurement.
    pub fn code_dir(&self) -> PathBuf {
        if self.task.is_external_issue() {
            self.workspace.join(REPO_DIR)
        } else {
            self.workspace.to_path_buf()
        }
    }
}

pub struct MetricsCollector {
    capabilities: Capabilities,
    tokens: &'static TokenCounter,
    tests: TestRunner,
    issue_tests: TestRunner,
    container: Option<ContainerEvaluator>,
    guard_program: String,
}

impl MetricsCollector {
    pub fn new(config: &BenchmarkConfig, capabilities: Capabilities) -> Self {
        let container = (config.use_docker && capabilities.container_evaluation()).then(|| {
            ContainerEvaluator::new(
                config.cache_dir().join("evaluation"),
                Duration::from_secs(config.docker_timeout_secs),
            )
        });
        Self {
            capabilities,
            tokens: TokenCounter::ensure_initialized(),
            tests: TestRunner::new(Duration::from_secs(config.test_timeout_secs)),
            issue_tests: TestRunner::new(Duration::from_secs(config.issue_test_timeout_secs)),
            container,
            guard_program: "invar".to_string(),
        }
    }

    pub fn with_test_runner(mut self, runner: TestRunner) -> Self {
        self.tests = runner.clone();
        self.issue_tests = runner;
        self
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub async fn collect(&self, input: CollectInput<'_>) -> TaskMetrics {
        let mut metrics = TaskMetrics::default();
        if let Some(conversation) = input.conversation {
            metrics.apply_conversation(conversation);
        }
        if metrics.total_tokens == 0 {
            self.estimate_from_output(input.transcript, &mut metrics);
        }

        let code_dir = input.code_dir();
        match input.task.issue.as_ref().filter(|_| input.task.is_external_issue()) {
            Some(issue) => self.run_issue_tests(&code_dir, issue, &mut metrics).await,
            None => self.run_task_tests(input.workspace, input.task, &mut metrics).await,
        }

        let code = code::analyze(&code_dir);
        metrics.lines_of_code = code.lines_of_code;
        metrics.cyclomatic_complexity = code.complexity;

        if input.group == ExperimentGroup::Treatment {
            self.collect_contract_metrics(&code_dir, &mut metrics).await;
        }

        info!(
            task_id = %input.task.id,
            group = %input.group,
            tests_passed = metrics.tests_passed,
            tests_total = metrics.tests_total,
            lines_of_code = metrics.lines_of_code,
            "Collected metrics"
        );
        metrics
    }

    /// Iteration and token estimates from raw output.
    fn estimate_from_output(&self, transcript: &str, metrics: &mut TaskMetrics) {
        let markers = transcript.matches("Tool:").count() + transcript.matches('⏺').count();
        metrics.iterations = markers.max(1) as u64;
        let count = self.tokens.count(transcript);
        metrics.total_tokens = count.tokens;
        metrics.output_tokens = count.tokens;
        metrics.token_count_exact = count.exact;
    }

    async fn run_task_tests(&self, workspace: &Path, task: &Task, metrics: &mut TaskMetrics) {
        let visible = self.tests.run_file(workspace, &workspace.join(TEST_FILE)).await;
        metrics.tests_passed = u64::from(visible.passed);
        metrics.tests_failed = u64::from(visible.failed);
        metrics.tests_total = u64::from(visible.total());

        if task.has_hidden_test_suite() {
            let hidden = self
                .tests
                .run_scratch(workspace, &workspace.join(HIDDEN_TEST_FILE), &task.hidden_test_suite)
                .await;
            metrics.hidden_tests_passed = u64::from(hidden.passed);
            metrics.hidden_tests_total = u64::from(hidden.total());
        }
    }

    /// Must-now-pass results land in the hidden counts, must-still-pass in
    /// the visible ones.
    async fn run_issue_tests(&self, repo_dir: &Path, issue: &ExternalIssueMetadata, metrics: &mut TaskMetrics) {
        if let Some(evaluator) = &self.container {
            match evaluator.evaluate(repo_dir, issue).await {
                Ok(verdict) => {
                    apply_verdict(&verdict, issue, metrics);
                    return;
                }
                Err(e) => debug!(error = %e, "Container evaluation unavailable, running tests directly"),
            }
        }

        if !issue.must_now_pass.is_empty() {
            let now = self.issue_tests.run_each(repo_dir, &issue.must_now_pass).await;
            metrics.hidden_tests_passed = u64::from(now.passed);
            metrics.hidden_tests_total = u64::from(now.total());
        }
        if !issue.must_still_pass.is_empty() {
            let still = self.issue_tests.run_each(repo_dir, &issue.must_still_pass).await;
            metrics.tests_passed = u64::from(still.passed);
            metrics.tests_failed = u64::from(still.failed);
            metrics.tests_total = u64::from(still.total());
        }
    }

    async fn collect_contract_metrics(&self, code_dir: &Path, metrics: &mut TaskMetrics) {
        let stats = contracts::scan_tree(code_dir);
        metrics.has_contracts = stats.has_contracts();
        metrics.contract_coverage = stats.coverage();

        if !self.capabilities.guard_tool {
            return;
        }
        match guard::run_guard(&self.guard_program, code_dir).await {
            Ok(report) => {
                metrics.guard_errors = u64::from(report.errors);
                metrics.guard_warnings = u64::from(report.warnings);
            }
            Err(e) => debug!(error = %e, "Guard produced no report"),
        }
    }
}

/// Maps a container verdict onto the metrics record.
///
/// A resolved issue counts every must-now-pass test as passed.
pub fn apply_verdict(verdict: &ContainerVerdict, issue: &ExternalIssueMetadata, metrics: &mut TaskMetrics) {
    metrics.resolved = Some(verdict.resolved);
    if verdict.resolved {
        let required = issue.must_now_pass.len() as u64;
        metrics.hidden_tests_passed = required;
        metrics.hidden_tests_total = required;
    } else {
        metrics.hidden_tests_passed = u64::from(verdict.tests_passed);
        metrics.hidden_tests_total = u64::from(verdict.tests_passed + verdict.tests_failed);
    }
    metrics.tests_passed = u64::from(verdict.tests_passed);
    metrics.tests_failed = u64::from(verdict.tests_failed);
    metrics.tests_total = u64::from(verdict.tests_passed + verdict.tests_failed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskTier;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn task(hidden: &str) -> Task {
        Task {
            id: "t1".to_string(),
            name: "t1".to_string(),
            description: String::new(),
            tier: TaskTier::Contracts,
            prompt: "p".to_string(),
            initial_files: BTreeMap::new(),
            test_suite: String::new(),
            hidden_test_suite: hidden.to_string(),
            expected_files: Vec::new(),
            tags: Vec::new(),
            difficulty: "medium".to_string(),
            issue: None,
        }
    }

    fn collector() -> MetricsCollector {
        MetricsCollector::new(&BenchmarkConfig::default(), Capabilities::default())
            .with_test_runner(TestRunner::new(Duration::from_secs(5)).with_python("/nonexistent/python"))
    }

    fn workspace() -> TempDir {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("src/core")).unwrap();
        std::fs::write(
            tmp.path().join("src/core/ops.py"),
            "from deal import pre, post\n\n@pre(lambda x: x > 0)\n@post(lambda r: r > 0)\ndef double(x):\n    if x:\n        return x * 2\n    return 1\n",
        )
        .unwrap();
        tmp
    }

    #[tokio::test]
    async fn test_heuristics_without_conversation() {
        let ws = workspace();
        let task = task("def test_hidden():\n    assert True\n");
        let metrics = collector()
            .collect(CollectInput {
                workspace: ws.path(),
                task: &task,
                group: ExperimentGroup::Control,
                transcript: "⏺ Read file\n⏺ Edit file\nTool: Bash\n",
                conversation: None,
            })
            .await;

        assert_eq!(metrics.iterations, 3);
        assert!(metrics.total_tokens > 0);
        assert_eq!(metrics.output_tokens, metrics.total_tokens);
        assert_eq!(metrics.lines_of_code, 7);
        // Control runs are not scanned for contracts.
        assert!(!metrics.has_contracts);
        assert_eq!(metrics.hidden_tests_total, 0);
        assert!(!ws.path().join(HIDDEN_TEST_FILE).exists());
    }

    #[tokio::test]
    async fn test_conversation_overrides_estimates() {
        let ws = workspace();
        let task = task("");
        let conversation = ConversationMetrics {
            input_tokens: 100,
            output_tokens: 50,
            assistant_messages: 4,
            user_messages: 5,
            ..Default::default()
        };
        let metrics = collector()
            .collect(CollectInput {
                workspace: ws.path(),
                task: &task,
                group: ExperimentGroup::Treatment,
                transcript: "⏺ ⏺ ⏺ ⏺ ⏺ ⏺ ⏺ ⏺",
                conversation: Some(&conversation),
            })
            .await;

        assert_eq!(metrics.iterations, 4);
        assert_eq!(metrics.total_tokens, 150);
        assert!(metrics.token_count_exact);
        assert!(metrics.has_contracts);
        assert!((metrics.contract_coverage - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_apply_verdict() {
        let issue = ExternalIssueMetadata {
            must_now_pass: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            ..Default::default()
        };
        let mut metrics = TaskMetrics::default();
        apply_verdict(
            &ContainerVerdict {
                resolved: true,
                tests_passed: 3,
                tests_failed: 0,
            },
            &issue,
            &mut metrics,
        );
        assert_eq!(metrics.resolved, Some(true));
        assert_eq!(metrics.hidden_test_pass_rate(), 1.0);

        let mut metrics = TaskMetrics::default();
        apply_verdict(
            &ContainerVerdict {
                resolved: false,
                tests_passed: 1,
                tests_failed: 2,
            },
            &issue,
            &mut metrics,
        );
        assert_eq!(metrics.resolved, Some(false));
        assert_eq!(metrics.hidden_tests_passed, 1);
        assert_eq!(metrics.hidden_tests_total, 3);
    }
}
