//! Finding the transcript file that belongs to a workspace.
//!
//! The agent stores transcripts under `<projects>/<project-name>/*.jsonl`
//! where the project name is the absolute workspace path with `/` and `_`
//! replaced by `-`. Files named `agent-*` hold sub-agent logs and are ignored.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// Files modified up to this long after the recorded end still count.
const END_SLACK_MINUTES: i64 = 5;

#[derive(Debug, Clone)]
pub struct TranscriptLocator {
    projects_dir: PathBuf,
}

struct Candidate {
    path: PathBuf,
    modified: DateTime<Utc>,
    size: u64,
}

impl TranscriptLocator {
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
        }
    }

    /// `~/.claude/projects`, or `None` when no home directory is set.
    pub fn default_projects_dir() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".claude").join("projects"))
    }

    /// Project directory name derived from the workspace's absolute path.
    pub fn project_name(workspace: &Path) -> String {
        let absolute = std::fs::canonicalize(workspace).unwrap_or_else(|_| {
            std::env::current_dir()
                .map(|cwd| cwd.join(workspace))
                .unwrap_or_else(|_| workspace.to_path_buf())
        });
        absolute.to_string_lossy().replace(['/', '_'], "-")
    }

    pub fn project_dir(&self, workspace: &Path) -> PathBuf {
        self.projects_dir.join(Self::project_name(workspace))
    }

    /// Locates the transcript for `workspace`.
    ///
    /// With a window, the largest file modified within
    /// `[start, end + 5 min]` wins. Without a window, or when nothing falls
    /// inside it, the most recently modified file is returned.
    pub fn find(
        &self,
        workspace: &Path,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Option<PathBuf> {
        let dir = self.project_dir(workspace);
        let candidates = list_candidates(&dir);
        if candidates.is_empty() {
            debug!(dir = %dir.display(), "No transcripts found");
            return None;
        }

        if start.is_some() || end.is_some() {
            let latest = end.map(|e| e + Duration::minutes(END_SLACK_MINUTES));
            let in_window = candidates
                .iter()
                .filter(|c| start.map_or(true, |s| c.modified >= s))
                .filter(|c| latest.map_or(true, |l| c.modified <= l))
                .max_by_key(|c| c.size);
            if let Some(found) = in_window {
                return Some(found.path.clone());
            }
        }

        candidates
            .into_iter()
            .max_by_key(|c| c.modified)
            .map(|c| c.path)
    }
}

fn list_candidates(dir: &Path) -> Vec<Candidate> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            let name = path.file_name()?.to_str()?;
            if name.starts_with("agent-") || path.extension()?.to_str()? != "jsonl" {
                return None;
            }
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            let modified: DateTime<Utc> = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH).into();
            Some(Candidate {
                path,
                modified,
                size: meta.len(),
            })
        })
        .collect()
}
