//! Agent command line construction.

use serde_json::json;

use crate::config::{BenchmarkConfig, ExecutionMode};
use crate::task::{ExperimentGroup, Task};

/// Guidance prepended to treatment prompts in single-shot mode, where the
/// agent cannot load skills on its own.
const TREATMENT_PREFIX_PRINT: &str = "# Development Instructions (USBV Workflow)

Follow this workflow:
1. UNDERSTAND: What needs to be done? Check existing code structure.
2. SPECIFY: Write @pre/@post contracts BEFORE implementation.
3. BUILD: Implement following the contracts.
4. VALIDATE: Run invar guard to verify.

Required output:
- Show: ✓ Check-In: [project] | [branch] | [status]
- Show: ✓ Final: guard PASS | errors, warnings

Contract pattern (MUST use):
```python
from deal import pre, post

@pre(lambda x: x > 0)
@post(lambda result: result >= 0)
def calculate(x: int) -> int:
    '''
    >>> calculate(10)
    100
    '''
    return x * x
```

Core functions go in src/core/ with @pre/@post.
Shell functions go in src/shell/ with Result[T, E] return type.

---
Task:
";

/// Interactive sessions route through the workflow skill instead.
const TREATMENT_PREFIX_INTERACTIVE: &str =
    "Implement the following task using the /develop skill workflow.\n\nTask:\n";

/// A fully resolved agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl AgentCommand {
    /// Builds the agent invocation for one task and group.
    ///
    /// `guard_mcp_available` controls whether treatment runs get the guard
    /// tool wired in as an MCP server.
    pub fn build(
        config: &BenchmarkConfig,
        task: &Task,
        group: ExperimentGroup,
        guard_mcp_available: bool,
    ) -> Self {
        let mut args = vec!["--model".to_string(), config.agent_model.clone()];

        match config.execution_mode {
            ExecutionMode::Interactive => {
                args.push("--dangerously-skip-permissions".to_string());
                args.push("--max-turns".to_string());
                args.push(config.max_turns.to_string());
            }
            ExecutionMode::Print => {
                args.push("--print".to_string());
                args.push("--dangerously-skip-permissions".to_string());
            }
        }

        match group {
            ExperimentGroup::Control => {
                args.push("--strict-mcp-config".to_string());
                args.push("--mcp-config".to_string());
                args.push(json!({ "mcpServers": {} }).to_string());
            }
            ExperimentGroup::Treatment => {
                if guard_mcp_available {
                    args.push("--mcp-config".to_string());
                    args.push(guard_mcp_config().to_string());
                }
            }
        }

        args.push("-p".to_string());
        args.push(build_prompt(task, group, config.execution_mode));

        Self {
            program: config.agent_command.clone(),
            args,
        }
    }

    /// Prompt text passed after `-p`.
    pub fn prompt(&self) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == "-p")
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

/// Prompt as seen by the agent: treatment gets a mode-specific prefix.
pub fn build_prompt(task: &Task, group: ExperimentGroup, mode: ExecutionMode) -> String {
    match (group, mode) {
        (ExperimentGroup::Control, _) => task.prompt.clone(),
        (ExperimentGroup::Treatment, ExecutionMode::Print) => {
            format!("{TREATMENT_PREFIX_PRINT}{}", task.prompt)
        }
        (ExperimentGroup::Treatment, ExecutionMode::Interactive) => {
            format!("{TREATMENT_PREFIX_INTERACTIVE}{}", task.prompt)
        }
    }
}

fn guard_mcp_config() -> serde_json::Value {
    json!({
        "mcpServers": {
            "invar": {
                "command": "uvx",
                "args": ["invar-tools", "mcp"]
            }
        }
    })
}
