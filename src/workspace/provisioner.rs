//! Workspace provisioning for ordinary and repository-backed tasks.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::cache::RepoCache;
use super::validate::{is_contained_path, validate_repo_name, validate_revision};
use super::vcs::{SystemGit, Vcs};
use super::{configure_identity, map_git_error};
use crate::config::BenchmarkConfig;
use crate::error::ProvisionError;
use crate::task::{ExperimentGroup, Task};
use crate::telemetry;

const CLONE_TIMEOUT: Duration = Duration::from_secs(300);
const LOCAL_TIMEOUT: Duration = Duration::from_secs(60);
const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Directory inside an issue workspace holding the repository checkout.
pub const REPO_DIR: &str = "repo";
/// Visible test suite location, relative to the workspace.
pub const TEST_FILE: &str = "tests/test_task.py";

/// Builds fresh workspaces for (group, task) pairs.
pub struct WorkspaceProvisioner {
    config: BenchmarkConfig,
    vcs: Arc<dyn Vcs>,
    cache: RepoCache,
}

impl WorkspaceProvisioner {
    pub fn new(config: &BenchmarkConfig) -> Self {
        Self::with_vcs(config, Arc::new(SystemGit))
    }

    pub fn with_vcs(config: &BenchmarkConfig, vcs: Arc<dyn Vcs>) -> Self {
        let cache = RepoCache::new(config.bare_repos_dir(), config.repo_url_base.clone(), vcs.clone());
        Self {
            config: config.clone(),
            vcs,
            cache,
        }
    }

    pub fn cache(&self) -> &RepoCache {
        &self.cache
    }

    /// Destroys any previous workspace for the pair and builds a new one.
    pub async fn provision(&self, task: &Task, group: ExperimentGroup) -> Result<PathBuf, ProvisionError> {
        let workspace = self.config.workspace_path(group, &task.id);
        if workspace.exists() {
            std::fs::remove_dir_all(&workspace)?;
        }
        std::fs::create_dir_all(&workspace)?;

        if task.is_external_issue() {
            self.provision_issue(task, group, &workspace).await?;
        } else {
            self.provision_standard(task, group, &workspace).await?;
        }

        info!(task_id = %task.id, group = %group, path = %workspace.display(), "Workspace ready");
        Ok(workspace)
    }

    async fn provision_standard(
        &self,
        task: &Task,
        group: ExperimentGroup,
        workspace: &Path,
    ) -> Result<(), ProvisionError> {
        for dir in ["src/core", "src/shell", "tests"] {
            std::fs::create_dir_all(workspace.join(dir))?;
        }
        self.copy_group_assets(group, workspace)?;

        for (rel, content) in &task.initial_files {
            if !is_contained_path(rel) {
                warn!(task_id = %task.id, path = %rel, "Skipping initial file outside the workspace");
                continue;
            }
            write_file(&workspace.join(rel), content)?;
        }
        if task.has_test_suite() {
            write_file(&workspace.join(TEST_FILE), &task.test_suite)?;
        }

        if !self.track(workspace).await {
            debug!(task_id = %task.id, "Continuing with an untracked workspace");
        }
        Ok(())
    }

    /// `git init` plus an initial commit; false if any step failed.
    async fn track(&self, workspace: &Path) -> bool {
        let init = self.vcs.git(Some(workspace), &["init", "--quiet"], LOCAL_TIMEOUT).await;
        if !matches!(init, Ok(ref out) if out.success) {
            return false;
        }
        if !configure_identity(self.vcs.as_ref(), workspace).await {
            return false;
        }
        for args in [&["add", "."][..], &["commit", "--quiet", "-m", "Initial task setup"][..]] {
            match self.vcs.git(Some(workspace), args, LOCAL_TIMEOUT).await {
                Ok(out) if out.success => {}
                _ => return false,
            }
        }
        true
    }

    async fn provision_issue(
        &self,
        task: &Task,
        group: ExperimentGroup,
        workspace: &Path,
    ) -> Result<(), ProvisionError> {
        let issue = task.issue.as_ref().filter(|i| !i.repo.is_empty()).ok_or_else(|| {
            ProvisionError::MissingRepository {
                task_id: task.id.clone(),
            }
        })?;
        validate_repo_name(&issue.repo)?;
        let revision = if issue.base_commit.is_empty() {
            "HEAD"
        } else {
            issue.base_commit.as_str()
        };
        validate_revision(revision)?;

        let repo_dir = workspace.join(REPO_DIR);
        if self.config.use_repo_cache {
            let bare = self.cache.ensure(&issue.repo).await;
            telemetry::record_cache_operation("ensure", bare.is_ok());
            let bare = bare?;
            self.cache.add_worktree(&issue.repo, &bare, &repo_dir, revision).await?;
        } else {
            self.clone_direct(&issue.repo, revision, &repo_dir).await?;
        }

        if self.config.install_repo_deps {
            install_editable(&repo_dir).await;
        }

        self.copy_group_assets(group, workspace)?;
        std::fs::create_dir_all(workspace.join("tests"))?;
        Ok(())
    }

    async fn clone_direct(&self, repo: &str, revision: &str, dest: &Path) -> Result<(), ProvisionError> {
        info!(repo, revision, "Cloning repository without cache");
        let url = self.config.repo_url(repo);
        let dest_arg = dest.to_string_lossy().into_owned();
        let out = self
            .vcs
            .git(
                None,
                &["clone", "--no-checkout", "--filter=blob:none", &url, &dest_arg],
                CLONE_TIMEOUT,
            )
            .await
            .map_err(|e| map_git_error(e, repo, "clone", CLONE_TIMEOUT))?;
        if !out.success {
            return Err(ProvisionError::Clone {
                repo: repo.to_string(),
                stderr: out.stderr,
            });
        }

        let out = self
            .vcs
            .git(Some(dest), &["checkout", "--quiet", revision], LOCAL_TIMEOUT)
            .await
            .map_err(|e| map_git_error(e, repo, "checkout", LOCAL_TIMEOUT))?;
        if !out.success {
            return Err(ProvisionError::Checkout {
                repo: repo.to_string(),
                revision: revision.to_string(),
                stderr: out.stderr,
            });
        }

        configure_identity(self.vcs.as_ref(), dest).await;
        Ok(())
    }

    /// Copies the group's agent configuration files into the workspace root.
    fn copy_group_assets(&self, group: ExperimentGroup, workspace: &Path) -> Result<(), ProvisionError> {
        let source = self.config.group_config_dir(group);
        for asset in group.config_assets() {
            let from = source.join(asset);
            let to = workspace.join(asset);
            if from.is_dir() {
                copy_dir(&from, &to)?;
            } else if from.is_file() {
                std::fs::copy(&from, &to)?;
            } else {
                debug!(group = %group, asset, "Config asset not present");
            }
        }
        Ok(())
    }
}

fn write_file(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)
}

fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(from).into_iter().filter_map(Result::ok) {
        let Ok(rel) = entry.path().strip_prefix(from) else {
            continue;
        };
        let target = to.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Best-effort `pip install -e .` for checkouts that look installable.
async fn install_editable(repo_dir: &Path) {
    if !repo_dir.join("setup.py").exists() && !repo_dir.join("pyproject.toml").exists() {
        return;
    }
    let run = Command::new("pip")
        .args(["install", "-e", ".", "--quiet"])
        .current_dir(repo_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(INSTALL_TIMEOUT, run).await {
        Ok(Ok(out)) if out.status.success() => debug!(path = %repo_dir.display(), "Installed repository"),
        Ok(Ok(out)) => warn!(
            stderr = %String::from_utf8_lossy(&out.stderr).trim(),
            "Dependency install failed"
        ),
        Ok(Err(e)) => warn!(error = %e, "Could not run pip"),
        Err(_) => warn!("Dependency install timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ExternalIssueMetadata, TaskTier};
    use crate::workspace::testing::RecordingVcs;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn standard_task() -> Task {
        let mut initial_files = BTreeMap::new();
        initial_files.insert("src/core/math.py".to_string(), "def add(a, b):\n    pass\n".to_string());
        initial_files.insert("../escape.py".to_string(), "x = 1\n".to_string());
        Task {
            id: "add_numbers".to_string(),
            name: "Add".to_string(),
            description: String::new(),
            tier: TaskTier::Standard,
            prompt: "Implement add".to_string(),
            initial_files,
            test_suite: "def test_add():\n    assert True\n".to_string(),
            hidden_test_suite: String::new(),
            expected_files: Vec::new(),
            tags: Vec::new(),
            difficulty: "easy".to_string(),
            issue: None,
        }
    }

    fn issue_task(repo: &str) -> Task {
        Task {
            id: "psf__requests-1".to_string(),
            tier: TaskTier::ExternalIssue,
            initial_files: BTreeMap::new(),
            test_suite: String::new(),
            issue: Some(ExternalIssueMetadata {
                instance_id: "psf__requests-1".to_string(),
                repo: repo.to_string(),
                base_commit: "abc123".to_string(),
                ..Default::default()
            }),
            ..standard_task()
        }
    }

    fn setup() -> (TempDir, BenchmarkConfig) {
        let tmp = TempDir::new().unwrap();
        let config = BenchmarkConfig::new(tmp.path()).with_install_repo_deps(false);
        let treatment = config.group_config_dir(ExperimentGroup::Treatment);
        std::fs::create_dir_all(treatment.join(".invar")).unwrap();
        std::fs::write(treatment.join("CLAUDE.md"), "treatment rules").unwrap();
        std::fs::write(treatment.join("INVAR.md"), "protocol").unwrap();
        std::fs::write(treatment.join(".invar/context.md"), "ctx").unwrap();
        let control = config.group_config_dir(ExperimentGroup::Control);
        std::fs::create_dir_all(&control).unwrap();
        std::fs::write(control.join("CLAUDE.md"), "control rules").unwrap();
        std::fs::write(control.join("INVAR.md"), "never copied").unwrap();
        (tmp, config)
    }

    #[tokio::test]
    async fn test_standard_workspace_layout() {
        let (_tmp, config) = setup();
        let vcs = Arc::new(RecordingVcs::default());
        let provisioner = WorkspaceProvisioner::with_vcs(&config, vcs.clone());

        let ws = provisioner
            .provision(&standard_task(), ExperimentGroup::Treatment)
            .await
            .unwrap();

        assert!(ws.join("src/shell").is_dir());
        assert!(ws.join("src/core/math.py").is_file());
        assert!(ws.join(TEST_FILE).is_file());
        assert!(ws.join(".invar/context.md").is_file());
        assert_eq!(std::fs::read_to_string(ws.join("CLAUDE.md")).unwrap(), "treatment rules");
        assert!(!ws.parent().unwrap().join("escape.py").exists());

        let calls = vcs.calls();
        assert_eq!(calls[0], ["init", "--quiet"]);
        assert!(calls.iter().any(|c| c[..2] == ["config", "user.name"]));
        assert_eq!(calls.last().unwrap()[3], "Initial task setup");
    }

    #[tokio::test]
    async fn test_control_gets_only_agent_rules() {
        let (_tmp, config) = setup();
        let provisioner = WorkspaceProvisioner::with_vcs(&config, Arc::new(RecordingVcs::default()));
        let ws = provisioner
            .provision(&standard_task(), ExperimentGroup::Control)
            .await
            .unwrap();
        assert!(ws.join("CLAUDE.md").is_file());
        assert!(!ws.join("INVAR.md").exists());
        assert!(!ws.join(".invar").exists());
    }

    #[tokio::test]
    async fn test_git_failure_is_not_fatal() {
        let (_tmp, config) = setup();
        let vcs = Arc::new(RecordingVcs::failing_on("init"));
        let provisioner = WorkspaceProvisioner::with_vcs(&config, vcs.clone());
        let ws = provisioner
            .provision(&standard_task(), ExperimentGroup::Control)
            .await
            .unwrap();
        assert!(ws.join("src/core/math.py").is_file());
        assert_eq!(vcs.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_reprovision_starts_clean() {
        let (_tmp, config) = setup();
        let provisioner = WorkspaceProvisioner::with_vcs(&config, Arc::new(RecordingVcs::default()));
        let ws = provisioner
            .provision(&standard_task(), ExperimentGroup::Control)
            .await
            .unwrap();
        std::fs::write(ws.join("leftover.py"), "x").unwrap();

        let again = provisioner
            .provision(&standard_task(), ExperimentGroup::Control)
            .await
            .unwrap();
        assert_eq!(ws, again);
        assert!(!again.join("leftover.py").exists());
    }

    #[tokio::test]
    async fn test_issue_task_clones_once_across_runs() {
        let (_tmp, config) = setup();
        let vcs = Arc::new(RecordingVcs::creating_clones());
        let provisioner = WorkspaceProvisioner::with_vcs(&config, vcs.clone());
        let task = issue_task("psf/requests");

        let ws = provisioner.provision(&task, ExperimentGroup::Control).await.unwrap();
        provisioner.provision(&task, ExperimentGroup::Treatment).await.unwrap();

        assert!(ws.join(REPO_DIR).is_dir());
        assert!(ws.join("tests").is_dir());
        assert!(ws.join("CLAUDE.md").is_file());

        let calls = vcs.calls();
        let clones = calls.iter().filter(|c| c[0] == "clone").count();
        let fetches = calls.iter().filter(|c| c[0] == "fetch").count();
        assert_eq!(clones, 1);
        assert_eq!(fetches, 1);
        assert!(calls
            .iter()
            .any(|c| c.starts_with(&["worktree".to_string(), "add".to_string(), "--detach".to_string()])
                && c.get(4).map(String::as_str) == Some("abc123")));
    }

    #[tokio::test]
    async fn test_issue_task_without_cache_clones_directly() {
        let (_tmp, config) = setup();
        let config = config.with_repo_cache(false);
        let vcs = Arc::new(RecordingVcs::creating_clones());
        let provisioner = WorkspaceProvisioner::with_vcs(&config, vcs.clone());

        provisioner
            .provision(&issue_task("psf/requests"), ExperimentGroup::Control)
            .await
            .unwrap();

        let calls = vcs.calls();
        assert_eq!(calls[0][..3], ["clone", "--no-checkout", "--filter=blob:none"]);
        assert_eq!(calls[1], ["checkout", "--quiet", "abc123"]);
        assert!(!config.bare_repos_dir().exists());
    }

    #[tokio::test]
    async fn test_issue_task_errors() {
        let (_tmp, config) = setup();
        let provisioner = WorkspaceProvisioner::with_vcs(&config, Arc::new(RecordingVcs::failing_on("clone")));

        let err = provisioner
            .provision(&issue_task("psf/requests"), ExperimentGroup::Control)
            .await
            .unwrap_err();
        match err {
            ProvisionError::Clone { repo, stderr } => {
                assert_eq!(repo, "psf/requests");
                assert!(stderr.contains("clone failed"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = provisioner
            .provision(&issue_task(""), ExperimentGroup::Control)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::MissingRepository { .. }));
    }
}
