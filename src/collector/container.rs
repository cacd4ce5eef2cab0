//! Container-based evaluation of issue fixes.
//!
//! The agent's change is extracted as a diff against the base revision,
//! written as a one-line predictions file, and handed to the SWE-bench
//! harness, which builds the environment in Docker and reports a verdict.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::CollectError;
use crate::task::ExternalIssueMetadata;

/// Model identifier written into predictions and used in report paths.
pub const MODEL_NAME: &str = "contract-bench";
const DATASET: &str = "princeton-nlp/SWE-bench_Lite";
const DIFF_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome reported by the harness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerVerdict {
    pub resolved: bool,
    /// Must-now-pass tests that passed.
    pub tests_passed: u32,
    /// Must-now-pass tests that failed.
    pub tests_failed: u32,
}

#[derive(Serialize)]
struct Prediction<'a> {
    instance_id: &'a str,
    model_name_or_path: &'a str,
    model_patch: &'a str,
}

/// Runs the evaluation harness for one instance at a time.
#[derive(Debug, Clone)]
pub struct ContainerEvaluator {
    python: String,
    timeout: Duration,
    work_dir: PathBuf,
}

impl ContainerEvaluator {
    /// `work_dir` is where the harness runs and leaves its `logs/` tree.
    pub fn new(work_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            python: "python".to_string(),
            timeout,
            work_dir: work_dir.into(),
        }
    }

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    /// Evaluates the change in `repo_dir`.
    ///
    /// An empty diff is an unresolved verdict with every must-now-pass test
    /// failed, without running the harness.
    pub async fn evaluate(
        &self,
        repo_dir: &Path,
        issue: &ExternalIssueMetadata,
    ) -> Result<ContainerVerdict, CollectError> {
        let patch = extract_patch(repo_dir, &issue.base_commit).await?;
        if patch.trim().is_empty() {
            debug!(instance_id = %issue.instance_id, "No changes in workspace");
            return Ok(ContainerVerdict {
                resolved: false,
                tests_passed: 0,
                tests_failed: issue.must_now_pass.len() as u32,
            });
        }

        std::fs::create_dir_all(&self.work_dir)?;
        let mut predictions = tempfile::Builder::new()
            .prefix("predictions_")
            .suffix(".jsonl")
            .tempfile()?;
        let line = serde_json::to_string(&Prediction {
            instance_id: &issue.instance_id,
            model_name_or_path: MODEL_NAME,
            model_patch: &patch,
        })?;
        writeln!(predictions, "{line}")?;
        predictions.flush()?;

        let run_id = format!("bench-{}", uuid::Uuid::new_v4().simple());
        info!(instance_id = %issue.instance_id, run_id = %run_id, "Running container evaluation");

        let predictions_path = predictions.path().to_string_lossy().into_owned();
        let timeout_arg = self.timeout.as_secs().to_string();
        let run = Command::new(&self.python)
            .args([
                "-m",
                "swebench.harness.run_evaluation",
                "--dataset_name",
                DATASET,
                "--split",
                "test",
                "--instance_ids",
                &issue.instance_id,
                "--predictions_path",
                &predictions_path,
                "--max_workers",
                "1",
                "--cache_level",
                "env",
                "--run_id",
                &run_id,
                "--timeout",
                &timeout_arg,
            ])
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        // Image builds come on top of the per-instance timeout.
        let overall = self.timeout + Duration::from_secs(600);
        let output = tokio::time::timeout(overall, run)
            .await
            .map_err(|_| CollectError::Timeout {
                tool: "swebench".to_string(),
                seconds: overall.as_secs(),
            })??;
        if !output.status.success() {
            return Err(CollectError::BadOutput {
                tool: "swebench".to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let report_path = report_path(&self.work_dir, &run_id, &issue.instance_id);
        let report = std::fs::read_to_string(&report_path)?;
        parse_report(&report, &issue.instance_id)
    }
}

/// `logs/run_evaluation/<run_id>/<model>/<instance>/report.json` below `work_dir`.
pub fn report_path(work_dir: &Path, run_id: &str, instance_id: &str) -> PathBuf {
    work_dir
        .join("logs/run_evaluation")
        .join(run_id)
        .join(MODEL_NAME)
        .join(instance_id)
        .join("report.json")
}

/// Reads the verdict for `instance_id` from a harness report.
pub fn parse_report(report: &str, instance_id: &str) -> Result<ContainerVerdict, CollectError> {
    let value: Value = serde_json::from_str(report)?;
    let entry = value.get(instance_id).ok_or_else(|| CollectError::BadOutput {
        tool: "swebench".to_string(),
        message: format!("no report entry for {instance_id}"),
    })?;

    let now_pass = entry.pointer("/tests_status/FAIL_TO_PASS");
    let count = |key: &str| {
        now_pass
            .and_then(|v| v.get(key))
            .and_then(Value::as_array)
            .map_or(0, |a| a.len() as u32)
    };

    Ok(ContainerVerdict {
        resolved: entry.get("resolved").and_then(Value::as_bool).unwrap_or(false),
        tests_passed: count("success"),
        tests_failed: count("failure"),
    })
}

/// `git diff <base>` in the repository; empty when nothing changed.
async fn extract_patch(repo_dir: &Path, base: &str) -> Result<String, CollectError> {
    let mut args = vec!["diff"];
    if !base.is_empty() {
        args.push(base);
    }
    let run = Command::new("git")
        .args(&args)
        .current_dir(repo_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(DIFF_TIMEOUT, run)
        .await
        .map_err(|_| CollectError::Timeout {
            tool: "git diff".to_string(),
            seconds: DIFF_TIMEOUT.as_secs(),
        })??;
    if !output.status.success() {
        return Ok(String::new());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
