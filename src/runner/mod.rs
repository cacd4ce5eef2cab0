//! Agent execution for benchmark experiments.
//!
//! # Architecture
//!
//! ```text
//! Task → WorkspaceProvisioner → AgentCommand → ProcessController → MetricsCollector → TaskResult
//! ```
//!
//! The runner:
//! 1. Provisions a fresh workspace for the task and group
//! 2. Builds the agent invocation, wiring the guard tool in for treatment runs
//! 3. Runs the agent single-shot or inside a pseudo-terminal, answering
//!    known interactive prompts
//! 4. Collects metrics from the workspace and the agent transcript
//!
//! # Example
//!
//! ```ignore
//! use contract_bench::config::BenchmarkConfig;
//! use contract_bench::runner::ExperimentRunner;
//! use contract_bench::task::ExperimentGroup;
//!
//! let runner = ExperimentRunner::probe(BenchmarkConfig::new("./benchmark")).await;
//! let experiment = runner.run_experiment(&tasks, &ExperimentGroup::ALL).await;
//! let dir = runner.save(&experiment)?;
//! ```

pub mod command;
pub mod controller;
pub mod executor;
pub mod prompts;
pub mod pty;
pub mod result;

pub use command::{build_prompt, AgentCommand};
pub use controller::{ProcessController, ProcessOutput};
pub use executor::{ExperimentRunner, ExperimentSummary};
pub use prompts::{PromptResponder, PromptSignature};
pub use result::{ratio, ExperimentResult, TaskMetrics, TaskResult, TaskStatus};
