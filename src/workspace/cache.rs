//! Local cache of bare repository clones.
//!
//! Each `owner/name` repository is cloned once, blob-filtered, into
//! `<cache>/owner__name.git`. Later runs fetch into the existing clone and
//! check revisions out as detached worktrees.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::validate::{validate_repo_name, validate_revision};
use super::vcs::Vcs;
use super::{configure_identity, map_git_error};
use crate::error::ProvisionError;

const CLONE_TIMEOUT: Duration = Duration::from_secs(300);
const FETCH_TIMEOUT: Duration = Duration::from_secs(120);
const LOCAL_TIMEOUT: Duration = Duration::from_secs(60);

/// One cached repository.
#[derive(Debug, Clone, Serialize)]
pub struct CachedRepo {
    pub name: String,
    pub path: PathBuf,
    pub size_mb: f64,
}

/// Summary of the cache directory.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub cache_dir: PathBuf,
    pub repos: Vec<CachedRepo>,
    pub total_size_mb: f64,
}

pub struct RepoCache {
    root: PathBuf,
    url_base: String,
    vcs: Arc<dyn Vcs>,
}

impl RepoCache {
    pub fn new(root: impl Into<PathBuf>, url_base: impl Into<String>, vcs: Arc<dyn Vcs>) -> Self {
        Self {
            root: root.into(),
            url_base: url_base.into(),
            vcs,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory name for a repository: `owner/name` becomes `owner__name.git`.
    pub fn bare_name(repo: &str) -> String {
        format!("{}.git", repo.replace('/', "__"))
    }

    pub fn bare_path(&self, repo: &str) -> PathBuf {
        self.root.join(Self::bare_name(repo))
    }

    fn repo_url(&self, repo: &str) -> String {
        format!("{}/{}.git", self.url_base.trim_end_matches('/'), repo)
    }

    /// Returns the bare clone for `repo`, cloning it on first use.
    ///
    /// An existing clone is refreshed with a fetch; a failed or slow fetch
    /// only logs, the cached objects are used as they are.
    pub async fn ensure(&self, repo: &str) -> Result<PathBuf, ProvisionError> {
        validate_repo_name(repo)?;
        std::fs::create_dir_all(&self.root)?;
        let bare = self.bare_path(repo);

        if bare.exists() {
            debug!(repo, "Refreshing cached repository");
            match self
                .vcs
                .git(Some(&bare), &["fetch", "--all", "--prune"], FETCH_TIMEOUT)
                .await
            {
                Ok(out) if out.success => {}
                Ok(out) => warn!(repo, stderr = %out.stderr.trim(), "Fetch failed, using cached objects"),
                Err(e) => warn!(repo, error = %e, "Fetch failed, using cached objects"),
            }
            return Ok(bare);
        }

        info!(repo, path = %bare.display(), "Cloning repository into cache");
        let url = self.repo_url(repo);
        let dest = bare.to_string_lossy().into_owned();
        let out = self
            .vcs
            .git(None, &["clone", "--bare", "--filter=blob:none", &url, &dest], CLONE_TIMEOUT)
            .await
            .map_err(|e| map_git_error(e, repo, "clone", CLONE_TIMEOUT))?;
        if !out.success {
            return Err(ProvisionError::Clone {
                repo: repo.to_string(),
                stderr: out.stderr,
            });
        }
        Ok(bare)
    }

    /// Checks `revision` out of the bare clone as a detached worktree at `dest`.
    pub async fn add_worktree(
        &self,
        repo: &str,
        bare: &Path,
        dest: &Path,
        revision: &str,
    ) -> Result<(), ProvisionError> {
        validate_revision(revision)?;
        if dest.exists() {
            std::fs::remove_dir_all(dest)?;
        }

        // Stale registrations block re-adding the same path.
        let _ = self.vcs.git(Some(bare), &["worktree", "prune"], LOCAL_TIMEOUT).await;

        let dest_arg = dest.to_string_lossy().into_owned();
        let out = self
            .vcs
            .git(
                Some(bare),
                &["worktree", "add", "--detach", &dest_arg, revision],
                LOCAL_TIMEOUT,
            )
            .await
            .map_err(|e| map_git_error(e, repo, "worktree add", LOCAL_TIMEOUT))?;
        if !out.success {
            return Err(ProvisionError::Worktree {
                repo: repo.to_string(),
                revision: revision.to_string(),
                stderr: out.stderr,
            });
        }

        configure_identity(self.vcs.as_ref(), dest).await;
        Ok(())
    }

    /// Lists cached repositories with their on-disk size.
    pub fn stats(&self) -> io::Result<CacheStats> {
        let mut repos = Vec::new();
        for path in self.cached_paths()? {
            let bytes: u64 = WalkDir::new(&path)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .filter_map(|e| e.metadata().ok())
                .map(|m| m.len())
                .sum();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().trim_end_matches(".git").replace("__", "/"))
                .unwrap_or_default();
            repos.push(CachedRepo {
                name,
                path,
                size_mb: round2(bytes as f64 / (1024.0 * 1024.0)),
            });
        }

        let total = repos.iter().map(|r| r.size_mb).sum();
        Ok(CacheStats {
            cache_dir: self.root.clone(),
            repos,
            total_size_mb: round2(total),
        })
    }

    /// Removes one cached repository, or all of them; returns how many went.
    pub async fn evict(&self, repo: Option<&str>) -> io::Result<usize> {
        let targets = match repo {
            Some(repo) => {
                let path = self.bare_path(repo);
                if path.is_dir() {
                    vec![path]
                } else {
                    Vec::new()
                }
            }
            None => self.cached_paths()?,
        };

        for path in &targets {
            let _ = self.vcs.git(Some(path), &["worktree", "prune"], LOCAL_TIMEOUT).await;
            std::fs::remove_dir_all(path)?;
            info!(path = %path.display(), "Evicted cached repository");
        }
        Ok(targets.len())
    }

    fn cached_paths(&self) -> io::Result<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.root)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_dir() && p.extension().and_then(|e| e.to_str()) == Some("git"))
            .collect();
        paths.sort();
        Ok(paths)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::testing::RecordingVcs;
    use tempfile::TempDir;

    #[test]
    fn test_bare_name() {
        assert_eq!(RepoCache::bare_name("astropy/astropy"), "astropy__astropy.git");
    }

    #[tokio::test]
    async fn test_clone_once_then_fetch() {
        let tmp = TempDir::new().unwrap();
        let vcs = Arc::new(RecordingVcs::creating_clones());
        let cache = RepoCache::new(tmp.path(), "https://github.com", vcs.clone());

        let first = cache.ensure("psf/requests").await.unwrap();
        let second = cache.ensure("psf/requests").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, tmp.path().join("psf__requests.git"));

        let calls = vcs.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0][..3], ["clone", "--bare", "--filter=blob:none"]);
        assert_eq!(calls[0][3], "https://github.com/psf/requests.git");
        assert_eq!(calls[1], ["fetch", "--all", "--prune"]);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_cache() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("psf__requests.git")).unwrap();
        let vcs = Arc::new(RecordingVcs::failing_on("fetch"));
        let cache = RepoCache::new(tmp.path(), "https://github.com", vcs);
        assert!(cache.ensure("psf/requests").await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_clone_is_error() {
        let tmp = TempDir::new().unwrap();
        let vcs = Arc::new(RecordingVcs::failing_on("clone"));
        let cache = RepoCache::new(tmp.path(), "https://github.com", vcs);
        let err = cache.ensure("psf/requests").await.unwrap_err();
        assert!(matches!(err, ProvisionError::Clone { .. }));
    }

    #[tokio::test]
    async fn test_invalid_repo_never_reaches_git() {
        let tmp = TempDir::new().unwrap();
        let vcs = Arc::new(RecordingVcs::default());
        let cache = RepoCache::new(tmp.path(), "https://github.com", vcs.clone());
        assert!(cache.ensure("not-a-repo").await.is_err());
        assert!(vcs.calls().is_empty());
    }

    #[tokio::test]
    async fn test_worktree_prunes_then_adds_detached() {
        let tmp = TempDir::new().unwrap();
        let vcs = Arc::new(RecordingVcs::default());
        let cache = RepoCache::new(tmp.path(), "https://github.com", vcs.clone());
        let bare = tmp.path().join("psf__requests.git");
        let dest = tmp.path().join("ws/repo");

        cache.add_worktree("psf/requests", &bare, &dest, "abc123").await.unwrap();

        let calls = vcs.calls();
        assert_eq!(calls[0], ["worktree", "prune"]);
        assert_eq!(calls[1][..3], ["worktree", "add", "--detach"]);
        assert_eq!(calls[1][4], "abc123");
        assert!(calls.iter().any(|c| c[..2] == ["config", "user.email"]));
    }

    #[tokio::test]
    async fn test_stats_and_evict() {
        let tmp = TempDir::new().unwrap();
        let repo_dir = tmp.path().join("psf__requests.git");
        std::fs::create_dir_all(repo_dir.join("objects")).unwrap();
        std::fs::write(repo_dir.join("objects/pack"), vec![0u8; 2048]).unwrap();
        std::fs::create_dir_all(tmp.path().join("pallets__flask.git")).unwrap();
        std::fs::create_dir_all(tmp.path().join("not-a-cache-entry")).unwrap();

        let cache = RepoCache::new(tmp.path(), "https://github.com", Arc::new(RecordingVcs::default()));
        let stats = cache.stats().unwrap();
        let names: Vec<&str> = stats.repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["pallets/flask", "psf/requests"]);

        assert_eq!(cache.evict(Some("psf/requests")).await.unwrap(), 1);
        assert!(!repo_dir.exists());
        assert_eq!(cache.evict(Some("psf/requests")).await.unwrap(), 0);
        assert_eq!(cache.evict(None).await.unwrap(), 1);
        assert!(tmp.path().join("not-a-cache-entry").exists());
    }

    #[test]
    fn test_stats_on_missing_dir() {
        let cache = RepoCache::new("/nonexistent/cache", "https://github.com", Arc::new(RecordingVcs::default()));
        let stats = cache.stats().unwrap();
        assert!(stats.repos.is_empty());
        assert_eq!(stats.total_size_mb, 0.0);
    }
}
