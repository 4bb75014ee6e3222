//! Filesystem tools.
//!
//! Five operations over a shared [`PathSandbox`]: read, write, list,
//! create-directory, and stat. Every path is resolved and checked against
//! the sandbox before any I/O happens; writes are atomic via a temp file
//! renamed into place.

use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolError;
use crate::sandbox::PathSandbox;
use crate::stream::DataPart;
use crate::tool::{Durability, Tool, ToolContext};

/// Cap on content returned inline from a read.
const READ_CAP_BYTES: usize = 256 * 1024;

/// Arguments for `read_text_file`.
#[derive(Debug, Deserialize)]
pub struct ReadArgs {
    /// Path to read.
    pub path: String,
    /// Return only the first N lines.
    #[serde(default)]
    pub head: Option<usize>,
    /// Return only the last N lines.
    #[serde(default)]
    pub tail: Option<usize>,
}

/// Result payload of `read_text_file`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadOutput {
    /// Always present per the payload convention.
    pub success: bool,
    /// The resolved path.
    pub path: String,
    /// The (possibly sliced or capped) content.
    pub content: String,
    /// Whether the content was truncated by slicing or the size cap.
    pub truncated: bool,
}

/// Reads a text file inside the sandbox.
#[derive(Debug, Clone)]
pub struct ReadTextFileTool {
    sandbox: Arc<PathSandbox>,
}

impl ReadTextFileTool {
    /// Create the tool over a sandbox.
    #[must_use]
    pub fn new(sandbox: Arc<PathSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ReadTextFileTool {
    const NAME: &'static str = "read_text_file";
    type Args = ReadArgs;
    type Output = ReadOutput;
    type Error = ToolError;

    fn description(&self) -> String {
        "Read a text file. Optionally return only the first (head) or last (tail) N lines."
            .to_owned()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "minLength": 1},
                "head": {"type": "integer", "minimum": 1},
                "tail": {"type": "integer", "minimum": 1}
            },
            "required": ["path"]
        })
    }

    fn durability(&self) -> Durability {
        Durability::default().independent()
    }

    async fn call(&self, args: Self::Args, ctx: &ToolContext) -> Result<Self::Output, Self::Error> {
        let resolved = self.sandbox.resolve_existing(&args.path)?;
        let raw = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::execution(format!("read {}: {e}", resolved.display())))?;

        let (mut content, mut truncated) = slice_lines(&raw, args.head, args.tail);
        if content.len() > READ_CAP_BYTES {
            let mut end = READ_CAP_BYTES;
            while !content.is_char_boundary(end) {
                end -= 1;
            }
            content.truncate(end);
            truncated = true;
        }

        let path = resolved.display().to_string();
        ctx.emit_data(DataPart::FileContent {
            path: path.clone(),
            content: content.clone(),
            truncated,
        })
        .await;

        Ok(ReadOutput {
            success: true,
            path,
            content,
            truncated,
        })
    }
}

fn slice_lines(raw: &str, head: Option<usize>, tail: Option<usize>) -> (String, bool) {
    match (head, tail) {
        (Some(n), _) => {
            let lines: Vec<&str> = raw.lines().take(n).collect();
            let truncated = raw.lines().count() > n;
            (lines.join("\n"), truncated)
        }
        (None, Some(n)) => {
            let all: Vec<&str> = raw.lines().collect();
            let start = all.len().saturating_sub(n);
            (all[start..].join("\n"), start > 0)
        }
        (None, None) => (raw.to_owned(), false),
    }
}

/// Arguments for `write_file`.
#[derive(Debug, Deserialize)]
pub struct WriteArgs {
    /// Path to write.
    pub path: String,
    /// Content to write.
    pub content: String,
}

/// Result payload of `write_file`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOutput {
    /// Always present per the payload convention.
    pub success: bool,
    /// The resolved path.
    pub path: String,
    /// Bytes written.
    pub bytes_written: u64,
}

/// Writes a file atomically inside the sandbox.
#[derive(Debug, Clone)]
pub struct WriteFileTool {
    sandbox: Arc<PathSandbox>,
}

impl WriteFileTool {
    /// Create the tool over a sandbox.
    #[must_use]
    pub fn new(sandbox: Arc<PathSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    const NAME: &'static str = "write_file";
    type Args = WriteArgs;
    type Output = WriteOutput;
    type Error = ToolError;

    fn description(&self) -> String {
        "Write content to a file, replacing it atomically if it exists.".to_owned()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "minLength": 1},
                "content": {"type": "string"}
            },
            "required": ["path", "content"]
        })
    }

    async fn call(&self, args: Self::Args, _ctx: &ToolContext) -> Result<Self::Output, Self::Error> {
        let resolved = self.sandbox.resolve_new(&args.path)?;
        let parent = resolved
            .parent()
            .ok_or_else(|| ToolError::execution("path has no parent directory"))?;

        // Temp-then-rename keeps readers from ever seeing a partial file.
        let temp = parent.join(format!(
            ".{}.tmp-{:06x}",
            resolved
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            fastrand::u32(..)
        ));

        tokio::fs::write(&temp, args.content.as_bytes())
            .await
            .map_err(|e| ToolError::execution(format!("write {}: {e}", temp.display())))?;
        if let Err(e) = tokio::fs::rename(&temp, &resolved).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(ToolError::execution(format!(
                "rename into {}: {e}",
                resolved.display()
            )));
        }

        Ok(WriteOutput {
            success: true,
            path: resolved.display().to_string(),
            bytes_written: args.content.len() as u64,
        })
    }
}

/// Arguments naming a single path.
#[derive(Debug, Deserialize)]
pub struct PathArgs {
    /// The target path.
    pub path: String,
}

/// One entry of a directory listing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    /// Entry name.
    pub name: String,
    /// `"file"`, `"directory"`, or `"other"`.
    pub kind: String,
    /// Size in bytes for files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Result payload of `list_directory`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOutput {
    /// Always present per the payload convention.
    pub success: bool,
    /// The resolved path.
    pub path: String,
    /// Entries sorted by name.
    pub entries: Vec<DirEntry>,
}

/// Lists a directory inside the sandbox.
#[derive(Debug, Clone)]
pub struct ListDirectoryTool {
    sandbox: Arc<PathSandbox>,
}

impl ListDirectoryTool {
    /// Create the tool over a sandbox.
    #[must_use]
    pub fn new(sandbox: Arc<PathSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    const NAME: &'static str = "list_directory";
    type Args = PathArgs;
    type Output = ListOutput;
    type Error = ToolError;

    fn description(&self) -> String {
        "List the entries of a directory.".to_owned()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "minLength": 1}
            },
            "required": ["path"]
        })
    }

    fn durability(&self) -> Durability {
        Durability::default().independent()
    }

    async fn call(&self, args: Self::Args, _ctx: &ToolContext) -> Result<Self::Output, Self::Error> {
        let resolved = self.sandbox.resolve_existing(&args.path)?;
        let mut reader = tokio::fs::read_dir(&resolved)
            .await
            .map_err(|e| ToolError::execution(format!("list {}: {e}", resolved.display())))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| ToolError::execution(e.to_string()))?
        {
            let metadata = entry.metadata().await.ok();
            let kind = match &metadata {
                Some(m) if m.is_dir() => "directory",
                Some(m) if m.is_file() => "file",
                _ => "other",
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind: kind.to_owned(),
                size: metadata.and_then(|m| m.is_file().then(|| m.len())),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(ListOutput {
            success: true,
            path: resolved.display().to_string(),
            entries,
        })
    }
}

/// Result payload of `create_directory`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDirOutput {
    /// Always present per the payload convention.
    pub success: bool,
    /// The resolved path.
    pub path: String,
}

/// Creates a directory (recursively) inside the sandbox.
#[derive(Debug, Clone)]
pub struct CreateDirectoryTool {
    sandbox: Arc<PathSandbox>,
}

impl CreateDirectoryTool {
    /// Create the tool over a sandbox.
    #[must_use]
    pub fn new(sandbox: Arc<PathSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for CreateDirectoryTool {
    const NAME: &'static str = "create_directory";
    type Args = PathArgs;
    type Output = CreateDirOutput;
    type Error = ToolError;

    fn description(&self) -> String {
        "Create a directory, including missing parents.".to_owned()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "minLength": 1}
            },
            "required": ["path"]
        })
    }

    async fn call(&self, args: Self::Args, _ctx: &ToolContext) -> Result<Self::Output, Self::Error> {
        let resolved = self.sandbox.resolve_new(&args.path)?;
        tokio::fs::create_dir_all(&resolved)
            .await
            .map_err(|e| ToolError::execution(format!("mkdir {}: {e}", resolved.display())))?;

        Ok(CreateDirOutput {
            success: true,
            path: resolved.display().to_string(),
        })
    }
}

/// Result payload of `get_file_info`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfoOutput {
    /// Always present per the payload convention.
    pub success: bool,
    /// The resolved path.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Whether the target is a regular file.
    pub is_file: bool,
    /// Whether the target is a directory.
    pub is_directory: bool,
    /// Last modification time, unix milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_ms: Option<u64>,
    /// Whether the target is read-only.
    pub readonly: bool,
}

/// Stats a path inside the sandbox.
#[derive(Debug, Clone)]
pub struct GetFileInfoTool {
    sandbox: Arc<PathSandbox>,
}

impl GetFileInfoTool {
    /// Create the tool over a sandbox.
    #[must_use]
    pub fn new(sandbox: Arc<PathSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for GetFileInfoTool {
    const NAME: &'static str = "get_file_info";
    type Args = PathArgs;
    type Output = FileInfoOutput;
    type Error = ToolError;

    fn description(&self) -> String {
        "Get size, kind, and modification time for a path.".to_owned()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "minLength": 1}
            },
            "required": ["path"]
        })
    }

    fn durability(&self) -> Durability {
        Durability::default().independent()
    }

    async fn call(&self, args: Self::Args, _ctx: &ToolContext) -> Result<Self::Output, Self::Error> {
        let resolved = self.sandbox.resolve_existing(&args.path)?;
        let metadata = tokio::fs::metadata(&resolved)
            .await
            .map_err(|e| ToolError::execution(format!("stat {}: {e}", resolved.display())))?;

        let modified_ms = metadata.modified().ok().and_then(|time| {
            time.duration_since(UNIX_EPOCH)
                .ok()
                .map(|d: Duration| d.as_millis() as u64)
        });

        Ok(FileInfoOutput {
            success: true,
            path: resolved.display().to_string(),
            size: metadata.len(),
            is_file: metadata.is_file(),
            is_directory: metadata.is_dir(),
            modified_ms,
            readonly: metadata.permissions().readonly(),
        })
    }
}
