//! Per-run workspaces.
//!
//! Every (group, task) pair gets a directory of its own, rebuilt from scratch
//! on each provisioning call. Tasks anchored to a real repository check it
//! out of a shared bare-clone cache.
//!
//! - **Provisioner** (`provisioner`): builds workspaces for both task kinds
//! - **Cache** (`cache`): bare clones, worktrees, stats and eviction
//! - **VCS** (`vcs`): the `Vcs` seam and the system `git` implementation
//! - **Validation** (`validate`): repository, revision and path checks

pub mod cache;
pub mod provisioner;
pub mod validate;
pub mod vcs;

use std::io;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::ProvisionError;

pub use cache::{CacheStats, CachedRepo, RepoCache};
pub use provisioner::WorkspaceProvisioner;
pub use validate::{is_contained_path, validate_repo_name, validate_revision};
pub use vcs::{GitOutput, SystemGit, Vcs};

/// Commit identity used in every tracked workspace.
pub const GIT_USER_EMAIL: &str = "benchmark@invar.local";
pub const GIT_USER_NAME: &str = "Invar Benchmark";

const CONFIG_TIMEOUT: Duration = Duration::from_secs(30);

/// Sets the local commit identity so tracking never depends on global git config.
pub(crate) async fn configure_identity(vcs: &dyn Vcs, dir: &Path) -> bool {
    for (key, value) in [("user.email", GIT_USER_EMAIL), ("user.name", GIT_USER_NAME)] {
        match vcs.git(Some(dir), &["config", key, value], CONFIG_TIMEOUT).await {
            Ok(out) if out.success => {}
            _ => {
                debug!(dir = %dir.display(), key, "Could not set git identity");
                return false;
            }
        }
    }
    true
}

pub(crate) fn map_git_error(err: io::Error, repo: &str, operation: &str, timeout: Duration) -> ProvisionError {
    if err.kind() == io::ErrorKind::TimedOut {
        ProvisionError::Timeout {
            repo: repo.to_string(),
            operation: operation.to_string(),
            seconds: timeout.as_secs(),
        }
    } else {
        ProvisionError::Io(err)
    }
}
