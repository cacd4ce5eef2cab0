//! Benchmark configuration.
//!
//! [`BenchmarkConfig`] holds every knob of an experiment run plus the
//! directory layout below the benchmark root. It can be built in code with
//! `with_*` methods, loaded from a YAML file, and overridden from the
//! environment.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::ConfigError;
use crate::runner::PromptSignature;
use crate::task::ExperimentGroup;

/// How the agent process is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Single-shot: run to completion and capture all output.
    #[default]
    Print,
    /// Pseudo-terminal session with scripted responses to prompts.
    Interactive,
}

impl ExecutionMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "print" => Some(ExecutionMode::Print),
            "interactive" => Some(ExecutionMode::Interactive),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Print => write!(f, "print"),
            ExecutionMode::Interactive => write!(f, "interactive"),
        }
    }
}

/// Configuration for a benchmark experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Root holding `configs/`, `tasks/`, `workspace/`, `results/` and `.cache/`.
    pub benchmark_root: PathBuf,

    // Agent settings
    pub agent_command: String,
    pub agent_model: String,
    pub execution_mode: ExecutionMode,
    /// Turn limit passed to the agent in interactive mode.
    pub max_turns: u32,
    /// Single-shot timeout in seconds.
    pub timeout_secs: u64,
    /// Interactive-session timeout in seconds.
    pub interactive_timeout_secs: u64,
    /// Readiness wait per poll of the interactive loop.
    pub poll_interval_ms: u64,
    /// Time a terminated process gets before it is killed.
    pub termination_grace_secs: u64,
    /// Scripted answers for known interactive prompts, first match wins.
    pub prompt_signatures: Vec<PromptSignature>,

    // External repository settings
    pub use_repo_cache: bool,
    pub repo_url_base: String,
    /// Run `pip install -e .` in freshly checked out repositories.
    pub install_repo_deps: bool,

    // Evaluation settings
    pub use_docker: bool,
    pub docker_timeout_secs: u64,
    pub test_timeout_secs: u64,
    /// Timeout for each individual must-now-pass / must-still-pass test.
    pub issue_test_timeout_secs: u64,

    /// Directory holding the agent's per-project transcripts.
    /// Defaults to `~/.claude/projects`.
    pub transcripts_dir: Option<PathBuf>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            benchmark_root: PathBuf::from("."),
            agent_command: "claude".to_string(),
            agent_model: "sonnet".to_string(),
            execution_mode: ExecutionMode::Print,
            max_turns: 50,
            timeout_secs: 600,
            interactive_timeout_secs: 600,
            poll_interval_ms: 1000,
            termination_grace_secs: 5,
            prompt_signatures: PromptSignature::defaults(),
            use_repo_cache: true,
            repo_url_base: "https://github.com".to_string(),
            install_repo_deps: true,
            use_docker: false,
            docker_timeout_secs: 1800,
            test_timeout_secs: 60,
            issue_test_timeout_secs: 120,
            transcripts_dir: None,
        }
    }
}

impl BenchmarkConfig {
    /// Creates a configuration rooted at `root` with default values.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            benchmark_root: root.into(),
            ..Self::default()
        }
    }

    /// Loads a YAML configuration file. Missing keys take default values.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides.
    ///
    /// # Environment Variables
    ///
    /// - `BENCH_ROOT`: benchmark root directory
    /// - `BENCH_AGENT_COMMAND`: agent executable
    /// - `BENCH_MODEL`: agent model name
    /// - `BENCH_TIMEOUT_SECS`: single-shot timeout
    /// - `BENCH_USE_DOCKER`: container evaluation on/off
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(val) = std::env::var("BENCH_ROOT") {
            self.benchmark_root = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("BENCH_AGENT_COMMAND") {
            self.agent_command = val;
        }
        if let Ok(val) = std::env::var("BENCH_MODEL") {
            self.agent_model = val;
        }
        if let Ok(val) = std::env::var("BENCH_TIMEOUT_SECS") {
            self.timeout_secs = parse_env_value(&val, "BENCH_TIMEOUT_SECS")?;
        }
        if let Ok(val) = std::env::var("BENCH_USE_DOCKER") {
            self.use_docker = parse_env_bool(&val, "BENCH_USE_DOCKER")?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_command.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "agent_command cannot be empty".to_string(),
            ));
        }
        if self.timeout_secs == 0 || self.interactive_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "timeouts must be greater than 0".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.execution_mode == ExecutionMode::Interactive && self.max_turns == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_turns must be greater than 0 in interactive mode".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_agent_command(mut self, command: impl Into<String>) -> Self {
        self.agent_command = command.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.agent_model = model.into();
        self
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_max_turns(mut self, turns: u32) -> Self {
        self.max_turns = turns;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_interactive_timeout(mut self, timeout: Duration) -> Self {
        self.interactive_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_repo_cache(mut self, enabled: bool) -> Self {
        self.use_repo_cache = enabled;
        self
    }

    pub fn with_docker(mut self, enabled: bool) -> Self {
        self.use_docker = enabled;
        self
    }

    pub fn with_docker_timeout(mut self, timeout: Duration) -> Self {
        self.docker_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_repo_url_base(mut self, base: impl Into<String>) -> Self {
        self.repo_url_base = base.into();
        self
    }

    pub fn with_install_repo_deps(mut self, enabled: bool) -> Self {
        self.install_repo_deps = enabled;
        self
    }

    pub fn with_transcripts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.transcripts_dir = Some(dir.into());
        self
    }

    /// Timeout for the configured execution mode.
    pub fn agent_timeout(&self) -> Duration {
        match self.execution_mode {
            ExecutionMode::Print => Duration::from_secs(self.timeout_secs),
            ExecutionMode::Interactive => Duration::from_secs(self.interactive_timeout_secs),
        }
    }

    pub fn configs_dir(&self) -> PathBuf {
        self.benchmark_root.join("configs")
    }

    pub fn group_config_dir(&self, group: ExperimentGroup) -> PathBuf {
        self.configs_dir().join(group.as_str())
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.benchmark_root.join("tasks")
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.benchmark_root.join("workspace")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.benchmark_root.join("results")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.benchmark_root.join(".cache")
    }

    pub fn bare_repos_dir(&self) -> PathBuf {
        self.cache_dir().join("bare_repos")
    }

    /// Workspace directory for one (group, task) pair.
    pub fn workspace_path(&self, group: ExperimentGroup, task_id: &str) -> PathBuf {
        self.workspace_dir().join(group.as_str()).join(task_id)
    }

    /// Clone URL for an `owner/name` repository identifier.
    pub fn repo_url(&self, repo: &str) -> String {
        format!("{}/{}.git", self.repo_url_base.trim_end_matches('/'), repo)
    }
}

fn parse_env_value<T: std::str::FromStr>(val: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    val.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_env_bool(val: &str, key: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

/// Fingerprint of a group config directory.
///
/// SHA-256 over the relative path and content of every file whose name does
/// not start with a dot, in path order; first 12 hex characters. A missing
/// directory hashes to the digest of nothing.
pub fn config_fingerprint(dir: &Path) -> String {
    let mut hasher = Sha256::new();
    if dir.is_dir() {
        for entry in WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() || entry.file_name().to_string_lossy().starts_with('.')
            {
                continue;
            }
            let Ok(content) = std::fs::read(entry.path()) else {
                continue;
            };
            if let Ok(rel) = entry.path().strip_prefix(dir) {
                hasher.update(rel.to_string_lossy().as_bytes());
            }
            hasher.update(&content);
        }
    }
    let digest = hex::encode(hasher.finalize());
    digest[..12].to_string()
}

/// Reproducibility snapshot stored alongside experiment results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentMetadata {
    pub timestamp: DateTime<Utc>,
    pub agent_version: String,
    pub guard_version: String,
    pub config: BenchmarkConfig,
    pub config_hashes: BTreeMap<ExperimentGroup, String>,
}

impl ExperimentMetadata {
    /// Captures tool versions and config fingerprints.
    pub async fn capture(config: &BenchmarkConfig) -> Self {
        let config_hashes = ExperimentGroup::ALL
            .into_iter()
            .map(|group| (group, config_fingerprint(&config.group_config_dir(group))))
            .collect();

        Self {
            timestamp: Utc::now(),
            agent_version: tool_version(&config.agent_command).await,
            guard_version: tool_version("invar").await,
            config: config.clone(),
            config_hashes,
        }
    }
}

async fn tool_version(program: &str) -> String {
    let output = tokio::time::timeout(
        Duration::from_secs(10),
        Command::new(program)
            .arg("--version")
            .kill_on_drop(true)
            .output(),
    )
    .await;

    match output {
        Ok(Ok(out)) if out.status.success() => String::from_utf8_lossy(&out.stdout).trim().to_string(),
        _ => {
            debug!(program, "Version probe failed");
            "unknown".to_string()
        }
    }
}
