//! Repository status via the `git` binary

use super::fs::resolve_in_sandbox;
use super::{Tool, ToolContext, ToolError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, Deserialize)]
struct GitStatusInput {
    repo_path: String,
}

pub struct GitStatusTool {
    base: PathBuf,
    git: PathBuf,
}

/// Parsed `git status --porcelain=v1 --branch`
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct RepoStatus {
    /// `None` on a detached HEAD
    pub branch: Option<String>,
    /// Tracked files with staged or unstaged changes
    pub is_dirty: bool,
    pub untracked: Vec<String>,
    pub modified: Vec<String>,
}

impl GitStatusTool {
    /// Returns `None` when no `git` executable is on `PATH`
    pub fn locate(base: PathBuf) -> Option<Self> {
        let git = which::which("git").ok()?;
        Some(Self { base, git })
    }
}

pub(crate) fn parse_porcelain(output: &str) -> RepoStatus {
    let mut status = RepoStatus::default();

    for line in output.lines() {
        if let Some(header) = line.strip_prefix("## ") {
            status.branch = parse_branch(header);
        } else if let Some(path) = line.strip_prefix("?? ") {
            status.untracked.push(path.to_string());
        } else if let Some(path) = line.get(3..) {
            // Renames are reported as "old -> new"
            let path = path.rsplit(" -> ").next().unwrap_or(path);
            status.modified.push(path.to_string());
        }
    }

    status.is_dirty = !status.modified.is_empty();
    status
}

fn parse_branch(header: &str) -> Option<String> {
    if header.starts_with("HEAD (no branch)") {
        return None;
    }
    let header = header
        .strip_prefix("No commits yet on ")
        .or_else(|| header.strip_prefix("Initial commit on "))
        .unwrap_or(header);
    let name = header.split("...").next()?.split(' ').next()?;
    (!name.is_empty()).then(|| name.to_string())
}

#[async_trait]
impl Tool for GitStatusTool {
    fn name(&self) -> &'static str {
        "git.status"
    }

    fn description(&self) -> String {
        "Get the git status (branch, dirty flag, untracked and modified files) of the repository containing a path".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["repo_path"],
            "properties": {
                "repo_path": {
                    "type": "string",
                    "description": "Any path inside the repository"
                }
            },
            "additionalProperties": false
        })
    }

    async fn run(&self, args: Map<String, Value>, ctx: ToolContext) -> Result<Value, ToolError> {
        let input: GitStatusInput = serde_json::from_value(Value::Object(args))
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let full = resolve_in_sandbox(&self.base, &input.repo_path)?;

        let child = Command::new(&self.git)
            .arg("-C")
            .arg(&full)
            .args(["status", "--porcelain=v1", "--branch"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::execution(format!("Failed to run git: {e}")))?;

        let output = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
            result = child.wait_with_output() => result?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolError::execution(stderr.trim().to_string()));
        }

        let status = parse_porcelain(&String::from_utf8_lossy(&output.stdout));
        serde_json::to_value(status).map_err(|e| ToolError::execution(e.to_string()))
    }
}
