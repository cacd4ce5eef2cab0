//! Command-line interface for contract-bench.
//!
//! Provides commands for running experiments, analyzing stored results and
//! maintaining the repository cache.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
