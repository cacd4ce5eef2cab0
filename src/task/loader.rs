//! Loading task definitions from tier-partitioned directories.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use super::{Task, TaskTier};
use crate::error::TaskLoadError;

/// Reads and validates a single task JSON file.
///
/// External-issue metadata gets its difficulty score cached on load.
pub fn load_task_file(path: &Path) -> Result<Task, TaskLoadError> {
    let content = std::fs::read_to_string(path)?;
    let mut task: Task =
        serde_json::from_str(&content).map_err(|e| TaskLoadError::InvalidTask {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    if task.id.trim().is_empty() {
        return Err(TaskLoadError::InvalidTask {
            path: path.to_path_buf(),
            message: "task id is empty".to_string(),
        });
    }
    if let Some(issue) = task.issue.as_mut() {
        issue.difficulty();
    }
    Ok(task)
}

/// Discovers tasks below `<root>/<tier>/*.json`.
#[derive(Debug, Clone)]
pub struct TaskLoader {
    tasks_dir: PathBuf,
}

impl TaskLoader {
    pub fn new(tasks_dir: impl Into<PathBuf>) -> Self {
        Self {
            tasks_dir: tasks_dir.into(),
        }
    }

    /// Loads every task, optionally restricted to one tier.
    ///
    /// Tier directories and task files are visited in name order so the run
    /// order is stable across machines.
    pub fn load(&self, tier: Option<TaskTier>) -> Result<Vec<Task>, TaskLoadError> {
        let mut tasks = Vec::new();
        if !self.tasks_dir.exists() {
            debug!(dir = %self.tasks_dir.display(), "Tasks directory does not exist");
            return Ok(tasks);
        }

        for entry in WalkDir::new(&self.tasks_dir)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| TaskLoadError::Io(e.into()))?;
            let path = entry.path();
            let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
            if !entry.file_type().is_file() || !is_json {
                continue;
            }
            let Some(tier_dir) = path
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
            else {
                continue;
            };
            if let Some(wanted) = tier {
                if tier_dir != wanted.dir_name() {
                    continue;
                }
            }
            tasks.push(load_task_file(path)?);
        }

        debug!(count = tasks.len(), "Loaded tasks");
        Ok(tasks)
    }

    /// Loads tasks and keeps only those whose id is in `ids`.
    pub fn load_selected(
        &self,
        tier: Option<TaskTier>,
        ids: &[String],
    ) -> Result<Vec<Task>, TaskLoadError> {
        let tasks = self.load(tier)?;
        if ids.is_empty() {
            return Ok(tasks);
        }
        for id in ids {
            if !tasks.iter().any(|t| &t.id == id) {
                return Err(TaskLoadError::NotFound(id.clone()));
            }
        }
        Ok(tasks.into_iter().filter(|t| ids.contains(&t.id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_task(root: &Path, tier: &str, id: &str) {
        let dir = root.join(tier);
        std::fs::create_dir_all(&dir).unwrap();
        let body = serde_json::json!({
            "id": id,
            "name": id,
            "description": "test task",
            "tier": tier,
            "prompt": "Write a function",
            "initial_files": {"src/core/__init__.py": ""},
            "test_file": "def test_ok():\n    assert True\n"
        });
        std::fs::write(dir.join(format!("{id}.json")), body.to_string()).unwrap();
    }

    #[test]
    fn test_load_all_tiers_in_order() {
        let tmp = TempDir::new().unwrap();
        write_task(tmp.path(), "tier2_contracts", "b_task");
        write_task(tmp.path(), "tier1_standard", "z_task");
        write_task(tmp.path(), "tier1_standard", "a_task");
        std::fs::write(tmp.path().join("tier1_standard/README.md"), "ignore me").unwrap();

        let tasks = TaskLoader::new(tmp.path()).load(None).unwrap();
        let ids: Vec<_> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a_task", "z_task", "b_task"]);
    }

    #[test]
    fn test_load_filtered_by_tier() {
        let tmp = TempDir::new().unwrap();
        write_task(tmp.path(), "tier1_standard", "a_task");
        write_task(tmp.path(), "tier2_contracts", "b_task");

        let tasks = TaskLoader::new(tmp.path())
            .load(Some(TaskTier::Contracts))
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "b_task");
    }

    #[test]
    fn test_load_selected_unknown_id() {
        let tmp = TempDir::new().unwrap();
        write_task(tmp.path(), "tier1_standard", "a_task");
        let err = TaskLoader::new(tmp.path())
            .load_selected(None, &["missing".to_string()])
            .unwrap_err();
        assert!(matches!(err, TaskLoadError::NotFound(_)));
    }

    #[test]
    fn test_invalid_task_file() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("tier1_standard");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("bad.json"), "{\"id\": 1}").unwrap();
        let err = TaskLoader::new(tmp.path()).load(None).unwrap_err();
        assert!(matches!(err, TaskLoadError::InvalidTask { .. }));
    }

    #[test]
    fn test_missing_tasks_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let tasks = TaskLoader::new(tmp.path().join("nope")).load(None).unwrap();
        assert!(tasks.is_empty());
    }
}
