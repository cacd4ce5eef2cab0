//! Agent process controller.
//!
//! Launches the agent against a workspace either single-shot (capture all
//! output, hard timeout) or on a pseudo-terminal with scripted answers to
//! known prompts. Timeouts surface as [`ControllerError::Timeout`], never as
//! a failing exit code.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, info};

use super::command::AgentCommand;
use super::prompts::PromptResponder;
use super::pty::{self, PtySessionConfig, SessionEnd};
use crate::config::{BenchmarkConfig, ExecutionMode};
use crate::error::ControllerError;

/// Output of a finished agent process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    /// Prompt patterns answered automatically (interactive mode only).
    pub auto_responses: Vec<String>,
}

/// Runs agent processes in either execution mode.
#[derive(Debug, Clone)]
pub struct ProcessController {
    poll_interval: Duration,
    grace: Duration,
    responder: PromptResponder,
}

impl ProcessController {
    pub fn new(responder: PromptResponder) -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            grace: Duration::from_secs(5),
            responder,
        }
    }

    pub fn from_config(config: &BenchmarkConfig) -> Self {
        Self::new(PromptResponder::new(config.prompt_signatures.clone()))
            .with_poll_interval(Duration::from_millis(config.poll_interval_ms))
            .with_grace(Duration::from_secs(config.termination_grace_secs))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Runs `command` in `workspace` and waits for it to finish.
    pub async fn run(
        &self,
        command: &AgentCommand,
        workspace: &Path,
        mode: ExecutionMode,
        timeout: Duration,
    ) -> Result<ProcessOutput, ControllerError> {
        if command.program.is_empty() {
            return Err(ControllerError::EmptyCommand);
        }
        info!(
            program = %command.program,
            mode = %mode,
            workspace = %workspace.display(),
            "Starting agent"
        );
        match mode {
            ExecutionMode::Print => self.run_single_shot(command, workspace, timeout).await,
            ExecutionMode::Interactive => self.run_interactive(command, workspace, timeout).await,
        }
    }

    async fn run_single_shot(
        &self,
        command: &AgentCommand,
        workspace: &Path,
        timeout: Duration,
    ) -> Result<ProcessOutput, ControllerError> {
        let start = Instant::now();
        let child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ControllerError::Spawn {
                program: command.program.clone(),
                message: e.to_string(),
            })?;

        // Dropping the wait future on timeout kills the child.
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let exit_code = output.status.code().unwrap_or(-1);
                debug!(exit_code, "Agent finished");
                Ok(ProcessOutput {
                    exit_code,
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    duration: start.elapsed(),
                    auto_responses: Vec::new(),
                })
            }
            Ok(Err(e)) => Err(ControllerError::Io(e)),
            Err(_) => Err(ControllerError::Timeout {
                after: timeout,
                partial_output: String::new(),
            }),
        }
    }

    async fn run_interactive(
        &self,
        command: &AgentCommand,
        workspace: &Path,
        timeout: Duration,
    ) -> Result<ProcessOutput, ControllerError> {
        let program = command.program.clone();
        let args = command.args.clone();
        let cwd = workspace.to_path_buf();
        let responder = self.responder.clone();
        let session = PtySessionConfig {
            timeout,
            poll_interval: self.poll_interval,
            grace: self.grace,
        };

        let outcome = tokio::task::spawn_blocking(move || {
            pty::run_session(&program, &args, &cwd, &session, &responder)
        })
        .await
        .map_err(|e| ControllerError::Pty(format!("session task failed: {e}")))??;

        match outcome.end {
            SessionEnd::Exited(exit_code) => Ok(ProcessOutput {
                exit_code,
                stdout: outcome.output,
                stderr: String::new(),
                duration: outcome.elapsed,
                auto_responses: outcome.responses,
            }),
            SessionEnd::TimedOut => Err(ControllerError::Timeout {
                after: timeout,
                partial_output: outcome.output,
            }),
        }
    }
}

impl Default for ProcessController {
    fn default() -> Self {
        Self::new(PromptResponder::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: &str) -> AgentCommand {
        AgentCommand {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    #[tokio::test]
    async fn test_single_shot_captures_streams() {
        let tmp = TempDir::new().unwrap();
        let output = ProcessController::default()
            .run(
                &sh("echo out; echo err >&2; touch created.py; exit 2"),
                tmp.path(),
                ExecutionMode::Print,
                Duration::from_secs(10),
            )
            .await
            .unwrap();
        assert_eq!(output.exit_code, 2);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(tmp.path().join("created.py").exists());
    }

    #[tokio::test]
    async fn test_single_shot_timeout_is_distinct() {
        let tmp = TempDir::new().unwrap();
        let err = ProcessController::default()
            .run(
                &sh("sleep 30"),
                tmp.path(),
                ExecutionMode::Print,
                Duration::from_millis(300),
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_interactive_auto_response() {
        let tmp = TempDir::new().unwrap();
        let output = ProcessController::default()
            .with_poll_interval(Duration::from_millis(100))
            .run(
                &sh("printf 'Continue? [Y/n] '; read reply; echo \"reply=$reply\""),
                tmp.path(),
                ExecutionMode::Interactive,
                Duration::from_secs(10),
            )
            .await
            .unwrap();
        assert_eq!(output.exit_code, 0);
        assert!(output.stdout.contains("reply=Y"));
        assert_eq!(output.auto_responses.len(), 1);
    }

    #[tokio::test]
    async fn test_interactive_timeout_keeps_partial_output() {
        let tmp = TempDir::new().unwrap();
        let err = ProcessController::default()
            .with_poll_interval(Duration::from_millis(100))
            .with_grace(Duration::from_millis(500))
            .run(
                &sh("echo working; exec sleep 30"),
                tmp.path(),
                ExecutionMode::Interactive,
                Duration::from_millis(500),
            )
            .await
            .unwrap_err();
        match err {
            ControllerError::Timeout { partial_output, .. } => {
                assert!(partial_output.contains("working"))
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_command() {
        let tmp = TempDir::new().unwrap();
        let cmd = AgentCommand {
            program: String::new(),
            args: Vec::new(),
        };
        let err = ProcessController::default()
            .run(&cmd, tmp.path(), ExecutionMode::Print, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::EmptyCommand));
    }
}
