//! One-shot probe of optional external tools.
//!
//! The probe runs once per experiment; the resulting flags select fallback
//! paths instead of each call site retrying and swallowing failures.

use std::process::Stdio;
use std::time::Duration;

use bollard::Docker;
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info};

use super::tokens::TokenCounter;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Availability of the optional collaborators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Docker daemon answers a ping.
    pub container_runtime: bool,
    /// `swebench` is importable.
    pub evaluation_harness: bool,
    /// `invar` is on `PATH`.
    pub guard_tool: bool,
    /// `uvx` can launch the guard MCP server.
    pub mcp_launcher: bool,
    /// The BPE tokenizer loaded.
    pub exact_tokenizer: bool,
}

impl Capabilities {
    pub async fn probe() -> Self {
        let caps = Self {
            container_runtime: docker_available().await,
            evaluation_harness: command_succeeds("python", &["-c", "import swebench"]).await,
            guard_tool: command_succeeds("invar", &["--version"]).await,
            mcp_launcher: command_succeeds("uvx", &["--version"]).await,
            exact_tokenizer: TokenCounter::ensure_initialized().is_exact(),
        };
        info!(
            container_runtime = caps.container_runtime,
            evaluation_harness = caps.evaluation_harness,
            guard_tool = caps.guard_tool,
            mcp_launcher = caps.mcp_launcher,
            exact_tokenizer = caps.exact_tokenizer,
            "Probed capabilities"
        );
        caps
    }

    /// Container evaluation needs both the runtime and the harness package.
    pub fn container_evaluation(&self) -> bool {
        self.container_runtime && self.evaluation_harness
    }
}

pub async fn docker_available() -> bool {
    let docker = match Docker::connect_with_local_defaults() {
        Ok(docker) => docker,
        Err(e) => {
            debug!(error = %e, "Docker client unavailable");
            return false;
        }
    };
    match tokio::time::timeout(PROBE_TIMEOUT, docker.ping()).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "Docker ping failed");
            false
        }
        Err(_) => {
            debug!("Docker ping timed out");
            false
        }
    }
}

pub async fn command_succeeds(program: &str, args: &[&str]) -> bool {
    let run = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();
    matches!(tokio::time::timeout(PROBE_TIMEOUT, run).await, Ok(Ok(status)) if status.success())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_probe() {
        assert!(command_succeeds("/bin/sh", &["-c", "exit 0"]).await);
        assert!(!command_succeeds("/bin/sh", &["-c", "exit 1"]).await);
        assert!(!command_succeeds("/nonexistent/tool", &[]).await);
    }

    #[test]
    fn test_container_evaluation_requires_both() {
        let caps = Capabilities {
            container_runtime: true,
            ..Default::default()
        };
        assert!(!caps.container_evaluation());
        let caps = Capabilities {
            evaluation_harness: true,
            ..caps
        };
        assert!(caps.container_evaluation());
    }
}
