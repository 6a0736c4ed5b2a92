//! Filesystem tools confined to a base directory

use super::patch::apply_unified_diff;
use super::{Tool, ToolContext, ToolError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::{Component, Path, PathBuf};

/// Largest file `fs.read` will return
const MAX_READ_BYTES: u64 = 1024 * 1024;

/// Resolve `path` against `base` and reject anything that escapes it.
///
/// Relative paths are taken relative to `base`. `..` is folded lexically
/// before the containment check; symlinks inside the sandbox are not
/// followed here.
pub(crate) fn resolve_in_sandbox(base: &Path, path: &str) -> Result<PathBuf, ToolError> {
    if path.is_empty() {
        return Err(ToolError::InvalidArguments("path cannot be empty".to_string()));
    }

    let base = normalize(base);
    let candidate = Path::new(path);
    let joined = if candidate.is_absolute() {
        normalize(candidate)
    } else {
        normalize(&base.join(candidate))
    };

    if joined.starts_with(&base) {
        Ok(joined)
    } else {
        Err(ToolError::permission_denied(format!(
            "path outside allowed base: {path}"
        )))
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct FsReadInput {
    path: String,
}

#[derive(Debug, Deserialize)]
struct FsWriteInput {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApplyPatchInput {
    path: String,
    patch: String,
}

/// Read a UTF-8 text file
pub struct FsReadTool {
    base: PathBuf,
}

impl FsReadTool {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }
}

#[async_trait]
impl Tool for FsReadTool {
    fn name(&self) -> &'static str {
        "fs.read"
    }

    fn description(&self) -> String {
        format!(
            "Read a text file. Paths are relative to {} and may not leave it.",
            self.base.display()
        )
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path"],
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to read"
                }
            },
            "additionalProperties": false
        })
    }

    async fn run(&self, args: Map<String, Value>, _ctx: ToolContext) -> Result<Value, ToolError> {
        let input: FsReadInput = serde_json::from_value(Value::Object(args))
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let full = resolve_in_sandbox(&self.base, &input.path)?;

        let metadata = tokio::fs::metadata(&full).await?;
        if metadata.len() > MAX_READ_BYTES {
            return Err(ToolError::execution(format!(
                "file too large: {} bytes, max is {MAX_READ_BYTES}",
                metadata.len()
            )));
        }

        let content = tokio::fs::read_to_string(&full).await?;
        Ok(json!({"path": input.path, "content": content}))
    }
}

/// Create or overwrite a text file, creating parent directories
pub struct FsWriteTool {
    base: PathBuf,
}

impl FsWriteTool {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }
}

#[async_trait]
impl Tool for FsWriteTool {
    fn name(&self) -> &'static str {
        "fs.write"
    }

    fn description(&self) -> String {
        format!(
            "Write text content to a file inside {}, replacing any existing content.",
            self.base.display()
        )
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path", "content"],
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to write"
                },
                "content": {
                    "type": "string",
                    "description": "Full new file content"
                }
            },
            "additionalProperties": false
        })
    }

    async fn run(&self, args: Map<String, Value>, _ctx: ToolContext) -> Result<Value, ToolError> {
        let input: FsWriteInput = serde_json::from_value(Value::Object(args))
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let full = resolve_in_sandbox(&self.base, &input.path)?;

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, &input.content).await?;

        tracing::debug!(path = %full.display(), bytes = input.content.len(), "Wrote file");
        Ok(json!({"path": input.path, "bytes": input.content.len()}))
    }
}

/// Apply unified-diff hunks to an existing text file
pub struct FsApplyPatchTool {
    base: PathBuf,
}

impl FsApplyPatchTool {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }
}

#[async_trait]
impl Tool for FsApplyPatchTool {
    fn name(&self) -> &'static str {
        "fs.apply_patch"
    }

    fn description(&self) -> String {
        format!(
            "Apply a unified diff to a file inside {}. Every hunk must match the current \
             content exactly; on any mismatch the file is left untouched.",
            self.base.display()
        )
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path", "patch"],
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to patch"
                },
                "patch": {
                    "type": "string",
                    "description": "Unified diff with one or more @@ hunks"
                }
            },
            "additionalProperties": false
        })
    }

    async fn run(&self, args: Map<String, Value>, _ctx: ToolContext) -> Result<Value, ToolError> {
        let input: ApplyPatchInput = serde_json::from_value(Value::Object(args))
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let full = resolve_in_sandbox(&self.base, &input.path)?;

        let original = tokio::fs::read_to_string(&full).await?;
        let patched = apply_unified_diff(&original, &input.patch)
            .map_err(|e| ToolError::execution(format!("failed to apply patch: {e}")))?;
        tokio::fs::write(&full, &patched).await?;

        tracing::debug!(path = %full.display(), "Applied patch");
        Ok(json!({"path": input.path, "lines": patched.lines().count()}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let base = Path::new("/workspaces/project");
        assert_eq!(
            resolve_in_sandbox(base, "src/main.rs").unwrap(),
            PathBuf::from("/workspaces/project/src/main.rs")
        );
        assert_eq!(
            resolve_in_sandbox(base, "/workspaces/project/./a/../b").unwrap(),
            PathBuf::from("/workspaces/project/b")
        );
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let base = Path::new("/workspaces/project");
        assert!(matches!(
            resolve_in_sandbox(base, "../other/secret"),
            Err(ToolError::PermissionDenied(_))
        ));
        assert!(matches!(
            resolve_in_sandbox(base, "/etc/passwd"),
            Err(ToolError::PermissionDenied(_))
        ));
        // Sibling directory sharing a prefix is still outside
        assert!(matches!(
            resolve_in_sandbox(base, "/workspaces/project2/x"),
            Err(ToolError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_resolve_rejects_empty_path() {
        assert!(matches!(
            resolve_in_sandbox(Path::new("/tmp"), ""),
            Err(ToolError::InvalidArguments(_))
        ));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().to_path_buf();

        let written = FsWriteTool::new(base.clone())
            .run(
                args(json!({"path": "notes/todo.txt", "content": "buy milk"})),
                ToolContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(written, json!({"path": "notes/todo.txt", "bytes": 8}));

        let read = FsReadTool::new(base)
            .run(args(json!({"path": "notes/todo.txt"})), ToolContext::default())
            .await
            .unwrap();
        assert_eq!(read["content"], "buy milk");
    }

    #[tokio::test]
    async fn test_read_missing_file_is_execution_error() {
        let dir = TempDir::new().unwrap();
        let err = FsReadTool::new(dir.path().to_path_buf())
            .run(args(json!({"path": "nope.txt"})), ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution(_)));
    }

    #[tokio::test]
    async fn test_write_outside_base_is_denied() {
        let dir = TempDir::new().unwrap();
        let err = FsWriteTool::new(dir.path().to_path_buf())
            .run(
                args(json!({"path": "../escape.txt", "content": "x"})),
                ToolContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied(_)));
        assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_wrong_argument_type_is_invalid() {
        let dir = TempDir::new().unwrap();
        let err = FsWriteTool::new(dir.path().to_path_buf())
            .run(args(json!({"path": "a.txt", "content": 7})), ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_apply_patch() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "Hello\nBye\n").unwrap();

        let result = FsApplyPatchTool::new(dir.path().to_path_buf())
            .run(
                args(json!({
                    "path": "hello.txt",
                    "patch": "--- a/hello.txt\n+++ b/hello.txt\n@@ -1,2 +1,2 @@\n-Hello\n+Hello World\n Bye\n"
                })),
                ToolContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(result, json!({"path": "hello.txt", "lines": 2}));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("hello.txt")).unwrap(),
            "Hello World\nBye\n"
        );
    }

    #[tokio::test]
    async fn test_apply_patch_context_mismatch_leaves_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "Hello\n").unwrap();

        let err = FsApplyPatchTool::new(dir.path().to_path_buf())
            .run(
                args(json!({"path": "hello.txt", "patch": "@@ -1 +1 @@\n-Goodbye\n+Hi\n"})),
                ToolContext::default(),
            )
            .await
            .unwrap_err();
        match err {
            ToolError::Execution(message) => assert!(message.starts_with("failed to apply patch: hunk 1")),
            other => panic!("expected execution error, got {other:?}"),
        }
        assert_eq!(std::fs::read_to_string(dir.path().join("hello.txt")).unwrap(), "Hello\n");
    }

    #[tokio::test]
    async fn test_apply_patch_outside_base_is_denied() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("inner");
        std::fs::create_dir(&base).unwrap();
        std::fs::write(dir.path().join("outside.txt"), "Hello\n").unwrap();

        let err = FsApplyPatchTool::new(base)
            .run(
                args(json!({"path": "../outside.txt", "patch": "@@ -1 +1 @@\n-Hello\n+Owned\n"})),
                ToolContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied(_)));
        assert_eq!(std::fs::read_to_string(dir.path().join("outside.txt")).unwrap(), "Hello\n");
    }
}
