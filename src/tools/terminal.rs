//! Restricted command execution
//!
//! Commands are split into words with POSIX quoting rules and run
//! directly, never through a shell, so pipes, redirects, expansion and
//! globbing are unavailable. Only programs in `SAFE_COMMANDS` may be
//! started.

use super::{Tool, ToolContext, ToolError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

pub const SAFE_COMMANDS: &[&str] = &["echo", "ls", "pwd", "cat", "grep", "head", "tail"];

const MAX_OUTPUT_LENGTH: usize = 64 * 1024;
const SNIP_SIZE: usize = 4 * 1024;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TerminalInput {
    command: String,
}

pub struct TerminalExecTool {
    working_dir: PathBuf,
}

impl TerminalExecTool {
    pub fn new(working_dir: PathBuf) -> Self {
        Self { working_dir }
    }

    fn truncate_output(output: &str) -> String {
        if output.len() <= MAX_OUTPUT_LENGTH {
            return output.to_string();
        }

        let start: String = output.chars().take(SNIP_SIZE).collect();
        let mut end: Vec<char> = output.chars().rev().take(SNIP_SIZE).collect();
        end.reverse();
        let end: String = end.into_iter().collect();

        format!(
            "[output truncated in middle: got {} bytes, max is {MAX_OUTPUT_LENGTH} bytes]\n{start}\n\n[snip]\n\n{end}",
            output.len(),
        )
    }
}

#[async_trait]
impl Tool for TerminalExecTool {
    fn name(&self) -> &'static str {
        "terminal.exec"
    }

    fn description(&self) -> String {
        format!(
            "Run one allowlisted command ({}) without a shell. Returns exit code, stdout and stderr.\n<pwd>{}</pwd>",
            SAFE_COMMANDS.join(", "),
            self.working_dir.display()
        )
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["command"],
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Command line, e.g. `ls -la src`"
                }
            },
            "additionalProperties": false
        })
    }

    fn timeout(&self) -> Option<Duration> {
        Some(DEFAULT_TIMEOUT)
    }

    async fn run(&self, args: Map<String, Value>, ctx: ToolContext) -> Result<Value, ToolError> {
        let input: TerminalInput = serde_json::from_value(Value::Object(args))
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let words = shlex::split(&input.command)
            .ok_or_else(|| ToolError::InvalidArguments("unbalanced quotes in command".to_string()))?;
        let Some((program, rest)) = words.split_first() else {
            return Err(ToolError::InvalidArguments("command cannot be empty".to_string()));
        };
        let program = program.as_str();
        if !SAFE_COMMANDS.contains(&program) {
            return Err(ToolError::permission_denied(format!(
                "command not allowed: {program}"
            )));
        }

        let child = Command::new(program)
            .args(rest)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::execution(format!("Failed to spawn process: {e}")))?;

        // Dropping the child future on cancel kills the process
        let output = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
            result = child.wait_with_output() => result?,
        };

        let code = output.status.code();
        tracing::debug!(program, ?code, "Command finished");

        Ok(json!({
            "command": input.command,
            "code": code,
            "stdout": Self::truncate_output(&String::from_utf8_lossy(&output.stdout)),
            "stderr": Self::truncate_output(&String::from_utf8_lossy(&output.stderr)),
        }))
    }
}
