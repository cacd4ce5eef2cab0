//! Error types for contract-bench operations.
//!
//! Each subsystem owns one enum:
//! - Configuration loading and validation
//! - Task file loading
//! - Workspace provisioning and the repository cache
//! - Agent process control
//! - A single task run (provisioning or agent failure)
//! - Metrics collection helpers
//! - Experiment bookkeeping and persistence
//! - Offline analysis of stored results

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while building or loading the benchmark configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while loading task definition files.
#[derive(Debug, Error)]
pub enum TaskLoadError {
    #[error("Invalid task file '{path}': {message}")]
    InvalidTask { path: PathBuf, message: String },

    #[error("Task '{0}' not found")]
    NotFound(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while provisioning a workspace.
///
/// All variants are fatal for the task being provisioned and carry enough
/// context to diagnose the failing repository or revision.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Task '{task_id}' has no source repository")]
    MissingRepository { task_id: String },

    #[error("Invalid repository identifier '{repo}': {reason}")]
    InvalidRepository { repo: String, reason: String },

    #[error("Invalid revision '{revision}': {reason}")]
    InvalidRevision { revision: String, reason: String },

    #[error("Clone of '{repo}' failed: {stderr}")]
    Clone { repo: String, stderr: String },

    #[error("Checkout of '{repo}' at '{revision}' failed: {stderr}")]
    Checkout {
        repo: String,
        revision: String,
        stderr: String,
    },

    #[error("Worktree for '{repo}' at '{revision}' failed: {stderr}")]
    Worktree {
        repo: String,
        revision: String,
        stderr: String,
    },

    #[error("git {operation} for '{repo}' timed out after {seconds}s")]
    Timeout {
        repo: String,
        operation: String,
        seconds: u64,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the agent process controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error("Empty command")]
    EmptyCommand,

    #[error("Process timed out after {after:?}")]
    Timeout {
        after: Duration,
        partial_output: String,
    },

    #[error("Pseudo-terminal error: {0}")]
    Pty(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControllerError {
    /// Returns true when the process was stopped because it ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ControllerError::Timeout { .. })
    }
}

/// Errors that end a single task run early.
///
/// The experiment runner records these on the task result; they never abort
/// the experiment.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Workspace provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl RunError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RunError::Controller(e) if e.is_timeout())
    }
}

/// Errors from the external tools used during metrics collection.
///
/// These never escape the collector; every failure degrades the affected
/// metric to its default value.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("Tool '{0}' is not available")]
    ToolMissing(String),

    #[error("'{tool}' timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    #[error("Unexpected output from '{tool}': {message}")]
    BadOutput { tool: String, message: String },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while recording or persisting experiment results.
#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("Result for task '{task_id}' in group '{group}' already recorded")]
    DuplicateResult { group: String, task_id: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by offline analysis of stored experiment results.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Results file not found: {0}")]
    MissingResults(PathBuf),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
