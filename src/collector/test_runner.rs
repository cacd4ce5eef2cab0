//! Test-suite execution through pytest.
//!
//! Failures to run the tool at all degrade to zero counts; the caller only
//! ever sees numbers.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::CollectError;
use crate::telemetry;

static PASSED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) passed").expect("valid regex"));
static FAILED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) failed").expect("valid regex"));

/// Pass/fail counts from one test run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestCounts {
    pub passed: u32,
    pub failed: u32,
}

impl TestCounts {
    pub fn total(&self) -> u32 {
        self.passed + self.failed
    }
}

/// Extracts counts from pytest's summary line; missing numbers count as zero.
pub fn parse_summary(output: &str) -> TestCounts {
    let grab = |re: &Regex| {
        re.captures(output)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    TestCounts {
        passed: grab(&PASSED_RE),
        failed: grab(&FAILED_RE),
    }
}

/// Runs pytest targets with a per-invocation timeout.
#[derive(Debug, Clone)]
pub struct TestRunner {
    python: String,
    timeout: Duration,
}

impl TestRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            python: "python".to_string(),
            timeout,
        }
    }

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    async fn pytest(&self, cwd: &Path, target: &str) -> Result<(bool, String), CollectError> {
        let run = Command::new(&self.python)
            .args(["-m", "pytest", target, "-v", "--tb=no"])
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| CollectError::Timeout {
                tool: "pytest".to_string(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => CollectError::ToolMissing(self.python.clone()),
                _ => CollectError::Io(e),
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok((output.status.success(), text))
    }

    /// Runs one test file and parses its summary. Missing files count nothing.
    pub async fn run_file(&self, cwd: &Path, file: &Path) -> TestCounts {
        if !file.is_file() {
            return TestCounts::default();
        }
        let target = file.to_string_lossy();
        let counts = match self.pytest(cwd, &target).await {
            Ok((_, output)) => parse_summary(&output),
            Err(e) => {
                warn!(file = %file.display(), error = %e, "Test run failed");
                TestCounts::default()
            }
        };
        telemetry::record_tests_executed("file", counts.passed, counts.failed);
        counts
    }

    /// Writes `body` to `file`, runs it, and removes it again on every path.
    pub async fn run_scratch(&self, cwd: &Path, file: &Path, body: &str) -> TestCounts {
        let scratch = match ScratchFile::create(file, body) {
            Ok(scratch) => scratch,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "Could not write held-out tests");
                return TestCounts::default();
            }
        };
        self.run_file(cwd, scratch.path()).await
    }

    /// Runs each test id on its own; a test passes when pytest exits zero.
    ///
    /// Errors (including timeouts) count as failures.
    pub async fn run_each(&self, cwd: &Path, test_ids: &[String]) -> TestCounts {
        let mut counts = TestCounts::default();
        for test_id in test_ids {
            match self.pytest(cwd, test_id).await {
                Ok((true, _)) => counts.passed += 1,
                Ok((false, _)) => counts.failed += 1,
                Err(e) => {
                    debug!(test_id = %test_id, error = %e, "Test invocation failed");
                    counts.failed += 1;
                }
            }
        }
        telemetry::record_tests_executed("individual", counts.passed, counts.failed);
        counts
    }
}

/// A file that is removed when dropped.
struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    fn create(path: &Path, content: &str) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_summary() {
        let out = "tests/test_task.py::test_a PASSED\n==== 3 passed, 2 failed in 0.12s ====";
        assert_eq!(parse_summary(out), TestCounts { passed: 3, failed: 2 });
        assert_eq!(parse_summary("==== 4 passed in 0.01s ===="), TestCounts { passed: 4, failed: 0 });
        assert_eq!(parse_summary("ERROR: file not found"), TestCounts::default());
        assert_eq!(parse_summary("1 failed").total(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_counts_nothing() {
        let tmp = TempDir::new().unwrap();
        let counts = TestRunner::new(Duration::from_secs(5))
            .run_file(tmp.path(), &tmp.path().join("tests/test_task.py"))
            .await;
        assert_eq!(counts, TestCounts::default());
    }

    #[tokio::test]
    async fn test_missing_tool_degrades_to_zero_and_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let hidden = tmp.path().join("tests/test_hidden.py");
        let runner = TestRunner::new(Duration::from_secs(5)).with_python("/nonexistent/python");

        let counts = runner.run_scratch(tmp.path(), &hidden, "def test_x():\n    pass\n").await;
        assert_eq!(counts, TestCounts::default());
        assert!(!hidden.exists());

        let each = runner
            .run_each(tmp.path(), &["tests/test_a.py::test_one".to_string()])
            .await;
        assert_eq!(each, TestCounts { passed: 0, failed: 1 });
    }

    #[tokio::test]
    async fn test_exit_status_decides_individual_tests() {
        let tmp = TempDir::new().unwrap();
        // Stand-in interpreter: passes for test ids starting with "ok".
        let fake = tmp.path().join("fake-python");
        std::fs::write(&fake, "#!/bin/sh\ncase \"$3\" in *::ok*) echo '1 passed';; *) echo '1 failed'; exit 1;; esac\n")
            .unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let runner = TestRunner::new(Duration::from_secs(5)).with_python(fake.to_string_lossy());
        let ids = vec!["t::ok_one".to_string(), "t::bad".to_string(), "t::ok_two".to_string()];
        assert_eq!(runner.run_each(tmp.path(), &ids).await, TestCounts { passed: 2, failed: 1 });

        let file = tmp.path().join("tests/test_task.py");
        let counts = runner.run_scratch(tmp.path(), &file, "x").await;
        assert_eq!(counts, TestCounts { passed: 0, failed: 1 });
    }
}
