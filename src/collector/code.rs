//! Static size and complexity metrics over produced Python sources.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use walkdir::{DirEntry, WalkDir};

static DECISION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(if|for|while|except|and|or)\b").expect("valid regex"));

/// Largest file captured into a result's file set.
const MAX_CAPTURED_FILE_BYTES: u64 = 256 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CodeMetrics {
    pub lines_of_code: u64,
    /// Decision points per ten lines.
    pub complexity: f64,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    is_hidden(entry) || entry.file_name() == "__pycache__"
}

/// Python sources under `root`, excluding test files, caches and hidden entries.
pub fn source_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let name = e.file_name().to_string_lossy().to_lowercase();
            name.ends_with(".py") && !name.contains("test")
        })
        .map(DirEntry::into_path)
        .collect()
}

/// Non-blank lines that are not `#` comments.
pub fn count_code_lines(source: &str) -> u64 {
    source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .count() as u64
}

pub fn count_decision_points(source: &str) -> u64 {
    DECISION_RE.find_iter(source).count() as u64
}

/// Lines of code and the complexity proxy over every source file below `root`.
///
/// Unreadable files are skipped.
pub fn analyze(root: &Path) -> CodeMetrics {
    let mut lines = 0;
    let mut decisions = 0;
    for path in source_files(root) {
        let Ok(source) = std::fs::read_to_string(&path) else {
            continue;
        };
        lines += count_code_lines(&source);
        decisions += count_decision_points(&source);
    }
    CodeMetrics {
        lines_of_code: lines,
        complexity: decisions as f64 / lines.max(1) as f64 * 10.0,
    }
}

/// Collects the Python files the agent produced, keyed by relative path.
///
/// Test files are included here; only caches, hidden entries and oversized
/// files are left out.
pub fn collect_generated_files(root: &Path) -> BTreeMap<String, String> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("py"))
        .filter(|e| e.metadata().map(|m| m.len() <= MAX_CAPTURED_FILE_BYTES).unwrap_or(false))
        .filter_map(|e| {
            let rel = e.path().strip_prefix(root).ok()?.to_string_lossy().into_owned();
            let content = std::fs::read_to_string(e.path()).ok()?;
            Some((rel, content))
        })
        .collect()
}
