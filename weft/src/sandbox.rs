//! Filesystem path sandbox.
//!
//! Every filesystem tool operation resolves its target through a
//! [`PathSandbox`] before performing any I/O. Resolution expands `~`,
//! makes the path absolute, follows symlinks for existing targets, and
//! asserts containment under one of the allowed roots with a separator
//! boundary (so `/tmp/ws-evil` is not inside `/tmp/ws`).
//!
//! The sandbox is installed at agent construction and owned by the
//! agent's tools; agents never share one, so tests cannot pollute each
//! other through a global allowlist.

use std::path::{Component, Path, PathBuf};

use crate::error::{ToolError, ToolResult};

/// The allowed-roots set defining a filesystem sandbox.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    roots: Vec<PathBuf>,
}

impl PathSandbox {
    /// Create a sandbox allowing only `workspace_root`.
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            roots: vec![normalize_root(workspace_root.into())],
        }
    }

    /// Replace the allowed-roots set.
    ///
    /// This is the only mutation point; the set is fixed for the
    /// lifetime of a run.
    pub fn set_roots(&mut self, roots: impl IntoIterator<Item = PathBuf>) {
        self.roots = roots.into_iter().map(normalize_root).collect();
    }

    /// The current allowed roots.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// The primary root, used to anchor relative paths.
    #[must_use]
    pub fn primary_root(&self) -> Option<&Path> {
        self.roots.first().map(PathBuf::as_path)
    }

    /// Resolve an existing path: expand, absolutize, follow symlinks,
    /// and check containment.
    ///
    /// # Errors
    ///
    /// [`ToolError::AccessDenied`] before any I/O if the resolved target
    /// is outside every allowed root.
    pub fn resolve_existing(&self, raw: &str) -> ToolResult<PathBuf> {
        let absolute = self.absolutize(raw);
        // Follow symlinks best-effort; a target that cannot be
        // canonicalized is judged on its lexical form.
        let resolved = std::fs::canonicalize(&absolute).unwrap_or_else(|_| lexical_clean(&absolute));
        self.check(&resolved, raw)?;
        Ok(resolved)
    }

    /// Resolve a path that may not exist yet (write/create targets).
    ///
    /// The parent directory is symlink-resolved when present; the final
    /// component is judged lexically, so a write cannot be smuggled out
    /// through a dangling symlink name.
    ///
    /// # Errors
    ///
    /// [`ToolError::AccessDenied`] if the resolved target is outside
    /// every allowed root.
    pub fn resolve_new(&self, raw: &str) -> ToolResult<PathBuf> {
        let absolute = self.absolutize(raw);
        let cleaned = lexical_clean(&absolute);

        let resolved = match (cleaned.parent(), cleaned.file_name()) {
            (Some(parent), Some(name)) if parent.as_os_str().len() > 1 => {
                match std::fs::canonicalize(parent) {
                    Ok(parent) => parent.join(name),
                    Err(_) => cleaned.clone(),
                }
            }
            _ => cleaned.clone(),
        };

        self.check(&resolved, raw)?;
        Ok(resolved)
    }

    fn absolutize(&self, raw: &str) -> PathBuf {
        let expanded = expand_home(raw);
        if expanded.is_absolute() {
            expanded
        } else if let Some(root) = self.primary_root() {
            root.join(expanded)
        } else {
            expanded
        }
    }

    fn check(&self, resolved: &Path, raw: &str) -> ToolResult<()> {
        if self.roots.iter().any(|root| resolved.starts_with(root)) {
            Ok(())
        } else {
            Err(ToolError::AccessDenied(format!(
                "{raw} is outside allowed directories"
            )))
        }
    }
}

fn normalize_root(root: PathBuf) -> PathBuf {
    std::fs::canonicalize(&root).unwrap_or_else(|_| lexical_clean(&root))
}

/// Expand a leading `~` to the home directory.
fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" {
        return home_dir();
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        return home_dir().join(rest);
    }
    PathBuf::from(raw)
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME").map_or_else(|| PathBuf::from("/"), PathBuf::from)
}

/// Remove `.` and `..` components lexically.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other),
        }
    }
    cleaned
}
