//! contract-bench: A/B experiment harness for a coding agent.
//!
//! Runs the agent against a corpus of programming tasks once without
//! (control) and once with (treatment) contract tooling, collects metrics
//! from every run and compares the two groups statistically.

pub mod analysis;
pub mod cli;
pub mod collector;
pub mod config;
pub mod conversation;
pub mod error;
pub mod runner;
pub mod task;
pub mod telemetry;
pub mod workspace;

// Re-export commonly used error types
pub use error::{
    AnalysisError, CollectError, ConfigError, ControllerError, ExperimentError, ProvisionError,
    RunError, TaskLoadError,
};
