//! CLI command definitions for contract-bench.
//!
//! Runs A/B experiments, analyzes stored results and maintains the
//! repository cache.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use crate::analysis::{load_results, AnalysisReport};
use crate::collector::Capabilities;
use crate::config::{BenchmarkConfig, ExecutionMode};
use crate::conversation::{reanalyze_experiment, TranscriptLocator};
use crate::runner::ExperimentRunner;
use crate::task::{ExperimentGroup, TaskLoader, TaskTier};
use crate::telemetry;
use crate::workspace::{RepoCache, SystemGit};

/// Default benchmark root directory.
const DEFAULT_ROOT: &str = ".";

/// A/B benchmark harness for a coding agent with and without contract tooling.
#[derive(Parser)]
#[command(name = "contract-bench")]
#[command(about = "Run control/treatment experiments against a coding agent")]
#[command(version)]
#[command(
    long_about = "contract-bench runs a coding agent against a corpus of programming tasks twice, once bare (control) and once with contract tooling (treatment), collects metrics from each run and compares the groups statistically.\n\nExample usage:\n  contract-bench run --tier 1 --groups control,treatment\n  contract-bench analyze ./results/exp_20260101_120000"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run an experiment over the task corpus.
    Run(RunArgs),

    /// List the available tasks.
    List(ListArgs),

    /// Inspect or clear the shared repository cache.
    Cache(CacheArgs),

    /// Report which optional tools (Docker, evaluation harness, guard) are available.
    #[command(name = "check-docker")]
    CheckDocker,

    /// Compare the groups of a stored experiment.
    Analyze(AnalyzeArgs),

    /// Re-derive transcript metrics for a stored experiment.
    Reanalyze(AnalyzeArgs),
}

/// Options shared by commands that need a benchmark configuration.
#[derive(clap::Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Benchmark root directory holding configs/, tasks/, workspace/ and results/
    /// (default: current directory).
    #[arg(short = 'r', long)]
    pub root: Option<PathBuf>,

    /// YAML configuration file; command-line flags override its values.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
}

impl ConfigArgs {
    /// Priority: flags > environment > config file > defaults.
    fn load(&self) -> anyhow::Result<BenchmarkConfig> {
        let config = match &self.config {
            Some(path) => BenchmarkConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => BenchmarkConfig::new(DEFAULT_ROOT),
        };
        let mut config = config.apply_env()?;
        if let Some(root) = &self.root {
            config.benchmark_root = root.clone();
        }
        Ok(config)
    }
}

/// Arguments for `contract-bench run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Restrict the run to one tier (1-4 or a tier directory name).
    #[arg(short = 't', long)]
    pub tier: Option<String>,

    /// Comma-separated task ids to run (default: all tasks of the tier).
    #[arg(long, value_delimiter = ',')]
    pub tasks: Vec<String>,

    /// Comma-separated groups to run.
    #[arg(short = 'g', long, value_delimiter = ',', default_value = "control,treatment")]
    pub groups: Vec<String>,

    /// Execution mode: print or interactive.
    #[arg(long)]
    pub mode: Option<String>,

    /// Agent model name.
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Agent executable.
    #[arg(long)]
    pub agent: Option<String>,

    /// Per-run timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Evaluate external-issue tasks in containers.
    #[arg(long)]
    pub docker: bool,

    /// Clone repositories directly instead of using the shared cache.
    #[arg(long)]
    pub no_cache: bool,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `contract-bench list`.
#[derive(Parser, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Restrict the listing to one tier.
    #[arg(short = 't', long)]
    pub tier: Option<String>,
}

/// Arguments for `contract-bench cache`.
#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(subcommand)]
    pub command: CacheSubcommand,
}

/// Cache subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum CacheSubcommand {
    /// Show cached repositories and their size.
    Stats,

    /// Remove one cached repository, or all of them.
    Clear {
        /// Repository as `owner/name`.
        repo: Option<String>,
    },
}

/// Arguments for `contract-bench analyze` and `contract-bench reanalyze`.
#[derive(Parser, Debug)]
pub struct AnalyzeArgs {
    /// Experiment directory containing `results.json`.
    pub results_dir: PathBuf,

    /// Directory holding the agent's per-project transcripts.
    #[arg(long)]
    pub transcripts_dir: Option<PathBuf>,

    /// Output JSON instead of a table.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_experiment_command(args).await,
        Commands::List(args) => run_list_command(args),
        Commands::Cache(args) => run_cache_command(args).await,
        Commands::CheckDocker => run_check_docker_command().await,
        Commands::Analyze(args) => run_analyze_command(args),
        Commands::Reanalyze(args) => run_reanalyze_command(args),
    }
}

// ============================================================================
// Run Command Implementation
// ============================================================================

fn parse_tier(value: Option<&str>) -> anyhow::Result<Option<TaskTier>> {
    value
        .map(|v| TaskTier::parse(v).ok_or_else(|| anyhow::anyhow!("Unknown tier '{v}'")))
        .transpose()
}

fn parse_groups(values: &[String]) -> anyhow::Result<Vec<ExperimentGroup>> {
    let mut groups = Vec::new();
    for value in values {
        let group = ExperimentGroup::parse(value)
            .ok_or_else(|| anyhow::anyhow!("Unknown group '{value}'"))?;
        if !groups.contains(&group) {
            groups.push(group);
        }
    }
    if groups.is_empty() {
        anyhow::bail!("At least one group is required");
    }
    Ok(groups)
}

fn build_run_config(args: &RunArgs) -> anyhow::Result<BenchmarkConfig> {
    let mut config = args.config.load()?;
    if let Some(mode) = &args.mode {
        let mode = ExecutionMode::parse(mode).ok_or_else(|| anyhow::anyhow!("Unknown mode '{mode}'"))?;
        config = config.with_execution_mode(mode);
    }
    if let Some(model) = &args.model {
        config = config.with_model(model);
    }
    if let Some(agent) = &args.agent {
        config = config.with_agent_command(agent);
    }
    if let Some(secs) = args.timeout {
        let timeout = Duration::from_secs(secs);
        config = config.with_timeout(timeout).with_interactive_timeout(timeout);
    }
    if args.docker {
        config = config.with_docker(true);
    }
    if args.no_cache {
        config = config.with_repo_cache(false);
    }
    config.validate()?;
    Ok(config)
}

async fn run_experiment_command(args: RunArgs) -> anyhow::Result<()> {
    let config = build_run_config(&args)?;
    let tier = parse_tier(args.tier.as_deref())?;
    let groups = parse_groups(&args.groups)?;

    let tasks = TaskLoader::new(config.tasks_dir()).load_selected(tier, &args.tasks)?;
    if tasks.is_empty() {
        anyhow::bail!("No tasks found under {}", config.tasks_dir().display());
    }

    telemetry::init_metrics()?;
    info!(
        tasks = tasks.len(),
        groups = groups.len(),
        mode = %config.execution_mode,
        model = %config.agent_model,
        "Starting benchmark"
    );

    let runner = ExperimentRunner::probe(config).await;
    let experiment = runner.run_experiment(&tasks, &groups).await;
    let dir = runner.save(&experiment)?;

    let report = AnalysisReport::from_experiment(&experiment);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    print_report(&report);
    println!("\nResults saved to {}", dir.display());
    Ok(())
}

// ============================================================================
// List Command Implementation
// ============================================================================

fn run_list_command(args: ListArgs) -> anyhow::Result<()> {
    let config = args.config.load()?;
    let tier = parse_tier(args.tier.as_deref())?;
    let tasks = TaskLoader::new(config.tasks_dir()).load(tier)?;

    if tasks.is_empty() {
        println!("No tasks found under {}", config.tasks_dir().display());
        return Ok(());
    }
    for task in &tasks {
        println!("{:<32} {:<20} {:<8} {}", task.id, task.tier, task.difficulty, task.name);
    }
    println!("\n{} task(s)", tasks.len());
    Ok(())
}

// ============================================================================
// Cache Command Implementation
// ============================================================================

async fn run_cache_command(args: CacheArgs) -> anyhow::Result<()> {
    let config = args.config.load()?;
    let cache = RepoCache::new(config.bare_repos_dir(), config.repo_url_base.clone(), Arc::new(SystemGit));

    match args.command {
        CacheSubcommand::Stats => {
            let stats = cache.stats()?;
            println!("Cache directory: {}", stats.cache_dir.display());
            for repo in &stats.repos {
                println!("  {:<48} {:>10.2} MB", repo.name, repo.size_mb);
            }
            println!("{} repo(s), {:.2} MB total", stats.repos.len(), stats.total_size_mb);
        }
        CacheSubcommand::Clear { repo } => {
            let removed = cache.evict(repo.as_deref()).await?;
            match repo {
                Some(repo) if removed == 0 => warn!(repo = %repo, "Repository was not cached"),
                _ => println!("Removed {removed} cached repo(s)"),
            }
        }
    }
    Ok(())
}

async fn run_check_docker_command() -> anyhow::Result<()> {
    let caps = Capabilities::probe().await;
    let rows = [
        ("Container runtime", caps.container_runtime),
        ("Evaluation harness", caps.evaluation_harness),
        ("Guard tool", caps.guard_tool),
        ("MCP launcher", caps.mcp_launcher),
        ("Exact tokenizer", caps.exact_tokenizer),
    ];
    for (name, available) in rows {
        println!("{:<20} {}", name, if available { "available" } else { "missing" });
    }
    if caps.container_evaluation() {
        println!("\nContainer evaluation is available.");
    } else {
        println!("\nContainer evaluation is unavailable; tests will run directly.");
    }
    Ok(())
}

// ============================================================================
// Analyze Command Implementation
// ============================================================================

fn run_analyze_command(args: AnalyzeArgs) -> anyhow::Result<()> {
    let experiment = load_results(&args.results_dir)?;
    let report = AnalysisReport::from_experiment(&experiment);

    let json = serde_json::to_string_pretty(&report)?;
    fs::write(args.results_dir.join("analysis.json"), &json)?;

    if args.json {
        println!("{json}");
    } else {
        print_report(&report);
    }
    Ok(())
}

fn run_reanalyze_command(args: AnalyzeArgs) -> anyhow::Result<()> {
    let experiment = load_results(&args.results_dir)?;
    let projects_dir = args
        .transcripts_dir
        .or_else(TranscriptLocator::default_projects_dir)
        .context("No transcripts directory; pass --transcripts-dir")?;
    let locator = TranscriptLocator::new(projects_dir);

    let fallback = BenchmarkConfig::default();
    let (rebuilt, report) = reanalyze_experiment(&experiment, &locator, &fallback);

    let path = args.results_dir.join("results_reanalyzed.json");
    fs::write(&path, serde_json::to_string_pretty(&rebuilt)?)?;

    println!("Updated {} result(s)", report.updated);
    for (group, task_id) in &report.missing {
        println!("  no transcript: {group}/{task_id}");
    }
    println!("Written to {}", path.display());
    Ok(())
}

fn print_report(report: &AnalysisReport) {
    println!("Experiment {}", report.experiment_id);
    for group in [&report.control, &report.treatment] {
        println!(
            "  {:<10} {} task(s): {} completed, {} failed, {} timed out",
            group.group, group.total_tasks, group.completed_tasks, group.failed_tasks, group.timeout_tasks
        );
    }

    println!("\n{:<32} {:>12} {:>12} {:>10}  better", "Metric", "control", "treatment", "change");
    for row in &report.comparisons {
        println!(
            "{:<32} {:>12.3} {:>12.3} {:>9.1}%  {}",
            row.metric_name, row.control_value, row.treatment_value, row.percent_change, row.better_group
        );
    }

    println!("\n{:<24} {:>8} {:>8} {:>8}  effect", "Metric", "t", "p", "d");
    for test in &report.tests {
        let marker = if test.significant { "*" } else { "" };
        println!(
            "{:<24} {:>8.3} {:>8.4} {:>8.3}  {}{}",
            test.metric_name, test.t_statistic, test.p_value, test.effect_size, test.effect_label, marker
        );
        if let Some(warning) = &test.warning {
            println!("{:<24} {warning}", "");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "contract-bench",
            "run",
            "--tier",
            "2",
            "--tasks",
            "a,b",
            "--groups",
            "treatment",
            "--timeout",
            "30",
            "--no-cache",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.tasks, vec!["a", "b"]);
        assert_eq!(parse_groups(&args.groups).unwrap(), vec![ExperimentGroup::Treatment]);
        assert_eq!(parse_tier(args.tier.as_deref()).unwrap(), Some(TaskTier::Contracts));

        let config = build_run_config(&args).unwrap();
        assert_eq!(config.timeout_secs, 30);
        assert!(!config.use_repo_cache);
    }

    #[test]
    fn test_rejects_unknown_group() {
        assert!(parse_groups(&["placebo".to_string()]).is_err());
        assert!(parse_groups(&[]).is_err());
    }

    #[test]
    fn test_analyze_missing_results_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let result = run_analyze_command(AnalyzeArgs {
            results_dir: tmp.path().to_path_buf(),
            transcripts_dir: None,
            json: false,
        });
        assert!(result.is_err());
    }
}
