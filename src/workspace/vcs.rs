//! Version control seam.
//!
//! Provisioning and the repository cache talk to git only through [`Vcs`],
//! so tests can record invocations instead of touching the network.

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Captured result of one git invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs git subcommands.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Runs `git <args>` in `cwd` (or the current directory).
    ///
    /// A non-zero exit is reported through [`GitOutput::success`]; exceeding
    /// `timeout` is an error of kind [`io::ErrorKind::TimedOut`].
    async fn git(&self, cwd: Option<&Path>, args: &[&str], timeout: Duration) -> io::Result<GitOutput>;
}

/// [`Vcs`] backed by the `git` binary on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemGit;

#[async_trait]
impl Vcs for SystemGit {
    async fn git(&self, cwd: Option<&Path>, args: &[&str], timeout: Duration) -> io::Result<GitOutput> {
        debug!(args = ?args, "Running git");
        let mut cmd = Command::new("git");
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, format!("git timed out after {timeout:?}")))??;

        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_system_git_reports_failure_without_error() {
        let tmp = TempDir::new().unwrap();
        // Not a repository: git exits non-zero.
        let out = SystemGit
            .git(Some(tmp.path()), &["rev-parse", "HEAD"], Duration::from_secs(30))
            .await
            .unwrap();
        assert!(!out.success);
        assert!(!out.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_system_git_init() {
        let tmp = TempDir::new().unwrap();
        let out = SystemGit
            .git(Some(tmp.path()), &["init", "--quiet"], Duration::from_secs(30))
            .await
            .unwrap();
        assert!(out.success);
        assert!(tmp.path().join(".git").is_dir());
    }
}
