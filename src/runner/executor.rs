//! Experiment runner: provision, run the agent, collect, record.
//!
//! Tasks run one at a time and, within a task, one group at a time. A
//! failure in one run is recorded on its result and never stops the rest of
//! the experiment.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::command::AgentCommand;
use super::controller::ProcessController;
use super::result::{ExperimentResult, TaskResult};
use crate::analysis::GroupMetrics;
use crate::collector::{collect_generated_files, Capabilities, CollectInput, MetricsCollector};
use crate::config::{BenchmarkConfig, ExperimentMetadata};
use crate::conversation::{parse_transcript_file, ConversationMetrics, TranscriptLocator};
use crate::error::{ControllerError, ExperimentError, RunError};
use crate::task::{ExperimentGroup, Task};
use crate::telemetry;
use crate::workspace::WorkspaceProvisioner;

/// Group-level aggregates written to `summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentSummary {
    pub experiment_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub control: GroupMetrics,
    pub treatment: GroupMetrics,
}

impl ExperimentSummary {
    pub fn from_experiment(experiment: &ExperimentResult) -> Self {
        Self {
            experiment_id: experiment.experiment_id.clone(),
            start_time: experiment.start_time,
            end_time: experiment.end_time,
            control: GroupMetrics::from_results(
                ExperimentGroup::Control,
                experiment.results(ExperimentGroup::Control),
            ),
            treatment: GroupMetrics::from_results(
                ExperimentGroup::Treatment,
                experiment.results(ExperimentGroup::Treatment),
            ),
        }
    }
}

pub struct ExperimentRunner {
    config: BenchmarkConfig,
    capabilities: Capabilities,
    provisioner: WorkspaceProvisioner,
    controller: ProcessController,
    collector: MetricsCollector,
    locator: Option<TranscriptLocator>,
}

impl ExperimentRunner {
    pub fn new(config: BenchmarkConfig, capabilities: Capabilities) -> Self {
        let locator = config
            .transcripts_dir
            .clone()
            .or_else(TranscriptLocator::default_projects_dir)
            .map(TranscriptLocator::new);
        Self {
            provisioner: WorkspaceProvisioner::new(&config),
            controller: ProcessController::from_config(&config),
            collector: MetricsCollector::new(&config, capabilities),
            capabilities,
            locator,
            config,
        }
    }

    /// Probes optional tools once, then builds the runner.
    pub async fn probe(config: BenchmarkConfig) -> Self {
        let capabilities = Capabilities::probe().await;
        Self::new(config, capabilities)
    }

    pub fn with_provisioner(mut self, provisioner: WorkspaceProvisioner) -> Self {
        self.provisioner = provisioner;
        self
    }

    pub fn with_controller(mut self, controller: ProcessController) -> Self {
        self.controller = controller;
        self
    }

    pub fn with_collector(mut self, collector: MetricsCollector) -> Self {
        self.collector = collector;
        self
    }

    pub fn with_transcript_locator(mut self, locator: Option<TranscriptLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Runs one task for one group and returns its frozen result.
    pub async fn run_task(&self, task: &Task, group: ExperimentGroup) -> TaskResult {
        let mut result = TaskResult::start(&task.id, group);
        info!(task_id = %task.id, group = %group, "Running task");

        match self.execute(task, group, &mut result).await {
            Ok(()) => result.complete(),
            Err(e) if e.is_timeout() => {
                warn!(task_id = %task.id, group = %group, "Task timed out");
                result.time_out(format!(
                    "Task timed out after {}s",
                    self.config.agent_timeout().as_secs()
                ));
            }
            Err(e) => {
                error!(task_id = %task.id, group = %group, error = %e, "Task failed");
                result.fail(e.to_string());
            }
        }

        telemetry::record_agent_run(
            group.as_str(),
            &result.status.to_string(),
            &self.config.execution_mode.to_string(),
            result.metrics.execution_time_seconds,
        );
        result
    }

    async fn execute(
        &self,
        task: &Task,
        group: ExperimentGroup,
        result: &mut TaskResult,
    ) -> Result<(), RunError> {
        let workspace = self.provisioner.provision(task, group).await?;
        let command = AgentCommand::build(&self.config, task, group, self.capabilities.mcp_launcher);

        let output = match self
            .controller
            .run(&command, &workspace, self.config.execution_mode, self.config.agent_timeout())
            .await
        {
            Ok(output) => output,
            Err(ControllerError::Timeout {
                after,
                partial_output,
            }) => {
                result.update(|r| r.transcript = partial_output);
                return Err(ControllerError::Timeout {
                    after,
                    partial_output: String::new(),
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        };

        for pattern in &output.auto_responses {
            telemetry::record_auto_response(pattern);
        }
        debug!(
            task_id = %task.id,
            exit_code = output.exit_code,
            duration_secs = output.duration.as_secs_f64(),
            "Agent exited"
        );

        let conversation = self.load_conversation(&workspace, result.start_time);
        let input = CollectInput {
            workspace: &workspace,
            task,
            group,
            transcript: &output.stdout,
            conversation: conversation.as_ref(),
        };
        let generated_files = collect_generated_files(&input.code_dir());
        let metrics = self.collector.collect(input).await;

        result.update(|r| {
            r.transcript = output.stdout;
            if !output.stderr.trim().is_empty() {
                r.error_message = Some(output.stderr);
            }
            r.generated_files = generated_files;
            r.metrics = metrics;
        });
        Ok(())
    }

    fn load_conversation(&self, workspace: &Path, started: DateTime<Utc>) -> Option<ConversationMetrics> {
        let locator = self.locator.as_ref()?;
        let parsed = locator
            .find(workspace, Some(started), Some(Utc::now()))
            .and_then(|path| match parse_transcript_file(&path) {
                Ok(conversation) => Some(conversation),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not read transcript");
                    None
                }
            });
        telemetry::record_transcript(parsed.is_some());
        parsed
    }

    /// Runs every task under every group, in order.
    pub async fn run_experiment(&self, tasks: &[Task], groups: &[ExperimentGroup]) -> ExperimentResult {
        let metadata = ExperimentMetadata::capture(&self.config).await;
        let mut experiment = ExperimentResult::new(ExperimentResult::generate_id(), Some(metadata));
        let total = tasks.len() * groups.len();
        info!(experiment_id = %experiment.experiment_id, runs = total, "Starting experiment");

        let mut current = 0;
        for task in tasks {
            for &group in groups {
                current += 1;
                info!(progress = %format!("{current}/{total}"), task_id = %task.id, group = %group, "Run");
                let result = self.run_task(task, group).await;
                if let Err(e) = experiment.add_result(result) {
                    warn!(error = %e, "Dropping result");
                }
            }
        }

        experiment.finish();
        experiment
    }

    /// Writes `summary.json`, `results.json` and `metrics.prom` under
    /// `results/<experiment_id>/` and returns that directory.
    pub fn save(&self, experiment: &ExperimentResult) -> Result<PathBuf, ExperimentError> {
        let dir = self.config.results_dir().join(&experiment.experiment_id);
        fs::create_dir_all(&dir)?;

        let summary = ExperimentSummary::from_experiment(experiment);
        fs::write(dir.join("summary.json"), serde_json::to_string_pretty(&summary)?)?;
        fs::write(dir.join("results.json"), serde_json::to_string_pretty(experiment)?)?;
        fs::write(dir.join("metrics.prom"), telemetry::export_metrics())?;

        info!(path = %dir.display(), "Results saved");
        Ok(dir)
    }
}
