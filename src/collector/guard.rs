//! Guard tool invocation (`invar guard --json`).

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::process::Command;

use crate::error::CollectError;

pub const GUARD_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardReport {
    pub errors: u32,
    pub warnings: u32,
}

/// Reads error and warning counts from the guard's JSON report.
///
/// Counts may sit at the top level or under `summary`; absent counts are zero.
pub fn parse_guard_output(stdout: &str) -> Result<GuardReport, CollectError> {
    let value: Value = serde_json::from_str(stdout.trim())?;
    let object = value.as_object().ok_or_else(|| CollectError::BadOutput {
        tool: "invar guard".to_string(),
        message: "expected a JSON object".to_string(),
    })?;

    let count = |key: &str| -> u32 {
        object
            .get(key)
            .or_else(|| object.get("summary").and_then(|s| s.get(key)))
            .and_then(Value::as_u64)
            .map(|n| n.min(u32::MAX as u64) as u32)
            .unwrap_or(0)
    };

    Ok(GuardReport {
        errors: count("errors"),
        warnings: count("warnings"),
    })
}

/// Runs the guard in `dir`. Only a successful run yields counts.
pub async fn run_guard(program: &str, dir: &Path) -> Result<GuardReport, CollectError> {
    let run = Command::new(program)
        .args(["guard", "--json"])
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(GUARD_TIMEOUT, run)
        .await
        .map_err(|_| CollectError::Timeout {
            tool: program.to_string(),
            seconds: GUARD_TIMEOUT.as_secs(),
        })?
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CollectError::ToolMissing(program.to_string()),
            _ => CollectError::Io(e),
        })?;

    if !output.status.success() {
        return Err(CollectError::BadOutput {
            tool: program.to_string(),
            message: format!("exited with {}", output.status),
        });
    }
    parse_guard_output(&String::from_utf8_lossy(&output.stdout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_top_level_and_summary() {
        let top = parse_guard_output(r#"{"status": "passed", "errors": 2, "warnings": 5}"#).unwrap();
        assert_eq!(top, GuardReport { errors: 2, warnings: 5 });

        let nested = parse_guard_output(r#"{"summary": {"errors": 0, "warnings": 3}}"#).unwrap();
        assert_eq!(nested, GuardReport { errors: 0, warnings: 3 });

        assert_eq!(parse_guard_output("{}").unwrap(), GuardReport::default());
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(matches!(parse_guard_output("Guard passed"), Err(CollectError::Json(_))));
        assert!(matches!(parse_guard_output("[1, 2]"), Err(CollectError::BadOutput { .. })));
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let tmp = TempDir::new().unwrap();
        let err = run_guard("/nonexistent/invar", tmp.path()).await.unwrap_err();
        assert!(matches!(err, CollectError::ToolMissing(_)));
    }
}
