//! Task definitions, tiers and experiment groups.
//!
//! A [`Task`] is loaded from one JSON document and never mutated afterwards.
//! Tasks sourced from real repository issues carry an
//! [`ExternalIssueMetadata`] block describing the repository, revision and
//! the two regression test sets used to judge a fix.

mod loader;

pub use loader::{load_task_file, TaskLoader};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordinal category of task difficulty/kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskTier {
    #[serde(rename = "tier1_standard")]
    Standard,
    #[serde(rename = "tier2_contracts")]
    Contracts,
    #[serde(rename = "tier3_integration")]
    Integration,
    /// Tasks derived from real issues in external repositories.
    #[serde(rename = "tier4_swe")]
    ExternalIssue,
}

impl TaskTier {
    pub const ALL: [TaskTier; 4] = [
        TaskTier::Standard,
        TaskTier::Contracts,
        TaskTier::Integration,
        TaskTier::ExternalIssue,
    ];

    /// Directory name under the tasks root holding this tier's task files.
    pub fn dir_name(&self) -> &'static str {
        match self {
            TaskTier::Standard => "tier1_standard",
            TaskTier::Contracts => "tier2_contracts",
            TaskTier::Integration => "tier3_integration",
            TaskTier::ExternalIssue => "tier4_swe",
        }
    }

    /// Parses a tier from its directory name or a short alias (`1`..`4`).
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_lowercase();
        Self::ALL.into_iter().find(|tier| {
            let dir = tier.dir_name();
            value == dir || dir.strip_prefix("tier").is_some_and(|rest| rest.starts_with(&value))
        })
    }
}

impl fmt::Display for TaskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// One of the two experiment arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentGroup {
    Control,
    Treatment,
}

impl ExperimentGroup {
    pub const ALL: [ExperimentGroup; 2] = [ExperimentGroup::Control, ExperimentGroup::Treatment];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentGroup::Control => "control",
            ExperimentGroup::Treatment => "treatment",
        }
    }

    /// Entries of the group's config directory copied into every workspace.
    pub fn config_assets(&self) -> &'static [&'static str] {
        match self {
            ExperimentGroup::Control => &["CLAUDE.md"],
            ExperimentGroup::Treatment => &["CLAUDE.md", "INVAR.md", ".invar"],
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "control" => Some(ExperimentGroup::Control),
            "treatment" => Some(ExperimentGroup::Treatment),
            _ => None,
        }
    }
}

impl fmt::Display for ExperimentGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata for tasks anchored to an issue in an external repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalIssueMetadata {
    #[serde(default)]
    pub instance_id: String,
    /// Repository identifier in `owner/name` form.
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub base_commit: String,
    #[serde(default)]
    pub test_patch: String,
    /// Reference fix.
    #[serde(default, rename = "gold_patch")]
    pub fix_patch: String,
    /// Tests that must pass once the issue is fixed.
    #[serde(default, rename = "fail_to_pass")]
    pub must_now_pass: Vec<String>,
    /// Regression tests that must keep passing.
    #[serde(default, rename = "pass_to_pass")]
    pub must_still_pass: Vec<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub environment_setup_commit: String,
    /// Cached value of [`ExternalIssueMetadata::compute_difficulty`].
    #[serde(default)]
    pub difficulty_score: Option<u64>,
}

impl ExternalIssueMetadata {
    /// Difficulty = patch lines + 5 * |must-now-pass| + 0.1 * |must-still-pass|, floored.
    pub fn compute_difficulty(&self) -> u64 {
        let patch_lines = self.fix_patch.lines().count() as f64;
        let score = patch_lines
            + 5.0 * self.must_now_pass.len() as f64
            + 0.1 * self.must_still_pass.len() as f64;
        score.floor() as u64
    }

    /// Returns the cached score, computing and caching it on first use.
    pub fn difficulty(&mut self) -> u64 {
        if let Some(score) = self.difficulty_score {
            return score;
        }
        let score = self.compute_difficulty();
        self.difficulty_score = Some(score);
        score
    }
}

fn default_difficulty() -> String {
    "medium".to_string()
}

/// A benchmark task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tier: TaskTier,
    pub prompt: String,
    /// Relative path -> file content.
    #[serde(default)]
    pub initial_files: BTreeMap<String, String>,
    /// Visible test suite body.
    #[serde(default, rename = "test_file")]
    pub test_suite: String,
    /// Held-out test suite body, run only during collection.
    #[serde(default, rename = "hidden_test_file")]
    pub hidden_test_suite: String,
    #[serde(default)]
    pub expected_files: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    #[serde(default, rename = "swe_metadata", skip_serializing_if = "Option::is_none")]
    pub issue: Option<ExternalIssueMetadata>,
}

impl Task {
    /// Returns true if the task runs against an external repository checkout.
    ///
    /// Issue-tier tasks that ship their own initial files are sample tasks
    /// and are provisioned like ordinary ones.
    pub fn is_external_issue(&self) -> bool {
        self.tier == TaskTier::ExternalIssue && self.issue.is_some() && self.initial_files.is_empty()
    }

    pub fn has_test_suite(&self) -> bool {
        !self.test_suite.trim().is_empty()
    }

    pub fn has_hidden_test_suite(&self) -> bool {
        !self.hidden_test_suite.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue() -> ExternalIssueMetadata {
        ExternalIssueMetadata {
            instance_id: "psf__requests-1234".to_string(),
            repo: "psf/requests".to_string(),
            base_commit: "abc123".to_string(),
            fix_patch: "--- a/x.py\n+++ b/x.py\n@@ -1 +1 @@\n-a\n+b\n".to_string(),
            must_now_pass: vec!["tests/test_a.py::test_one".to_string()],
            must_still_pass: (0..25).map(|i| format!("tests/test_b.py::test_{i}")).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_difficulty_score_formula() {
        // 5 patch lines + 5 * 1 + 0.1 * 25 = 12.5
        assert_eq!(issue().compute_difficulty(), 12);
    }

    #[test]
    fn test_difficulty_is_cached_and_idempotent() {
        let mut meta = issue();
        assert!(meta.difficulty_score.is_none());
        let first = meta.difficulty();
        assert_eq!(meta.difficulty_score, Some(first));
        assert_eq!(meta.difficulty(), first);
        assert_eq!(meta.compute_difficulty(), first);
    }

    #[test]
    fn test_difficulty_survives_round_trip() {
        let mut meta = issue();
        let before = meta.difficulty();
        let json = serde_json::to_string(&meta).unwrap();
        let parsed: ExternalIssueMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.difficulty_score, Some(before));
        assert_eq!(parsed.compute_difficulty(), before);
    }

    #[test]
    fn test_task_wire_format() {
        let json = r#"{
            "id": "swe_001",
            "name": "Fix header parsing",
            "description": "d",
            "tier": "tier4_swe",
            "prompt": "Fix it",
            "swe_metadata": {
                "repo": "psf/requests",
                "base_commit": "abc",
                "gold_patch": "x\ny",
                "fail_to_pass": ["t1"],
                "pass_to_pass": ["t2", "t3"]
            }
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.tier, TaskTier::ExternalIssue);
        assert_eq!(task.difficulty, "medium");
        assert!(task.is_external_issue());
        let meta = task.issue.as_ref().unwrap();
        assert_eq!(meta.must_now_pass, vec!["t1"]);
        assert_eq!(meta.must_still_pass.len(), 2);

        let mut sample = task.clone();
        sample.initial_files.insert("src/x.py".to_string(), String::new());
        assert!(!sample.is_external_issue());

        let back: Task = serde_json::from_str(&serde_json::to_string(&task).unwrap()).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_tier_parse_aliases() {
        assert_eq!(TaskTier::parse("tier2_contracts"), Some(TaskTier::Contracts));
        assert_eq!(TaskTier::parse("4"), Some(TaskTier::ExternalIssue));
        assert_eq!(TaskTier::parse("tier5"), None);
    }

    #[test]
    fn test_group_assets() {
        assert_eq!(ExperimentGroup::Control.config_assets(), &["CLAUDE.md"]);
        assert!(ExperimentGroup::Treatment.config_assets().contains(&".invar"));
        assert_eq!(ExperimentGroup::parse("Treatment"), Some(ExperimentGroup::Treatment));
        assert_eq!(ExperimentGroup::Control.to_string(), "control");
    }
}
