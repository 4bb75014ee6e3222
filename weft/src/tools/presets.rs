//! Tool presets.
//!
//! Presets form a strict chain: `minimal ⊂ standard ⊂ full`. Every build
//! returns a fresh, isolated toolbox — its own sandbox, reasoning state,
//! and background registry — so agents never share tool state.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::sandbox::PathSandbox;
use crate::tool::ToolBox;

use super::background::BackgroundTool;
use super::browser::BrowserTool;
use super::fs::{
    CreateDirectoryTool, GetFileInfoTool, ListDirectoryTool, ReadTextFileTool, WriteFileTool,
};
use super::reasoning::ReasoningTool;
use super::shell::ShellTool;

/// Named tool-set presets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolPreset {
    /// Filesystem and reasoning tools only.
    Minimal,
    /// Minimal plus the safe shell.
    #[default]
    Standard,
    /// Standard plus the browser and background controller.
    Full,
}

impl ToolPreset {
    /// The lowercase preset name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Standard => "standard",
            Self::Full => "full",
        }
    }

    /// Parse a preset name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "minimal" => Some(Self::Minimal),
            "standard" => Some(Self::Standard),
            "full" => Some(Self::Full),
            _ => None,
        }
    }

    /// Build a fresh toolbox for a workspace root.
    #[must_use]
    pub fn build(&self, workspace_root: &Path) -> ToolBox {
        let sandbox = Arc::new(PathSandbox::new(workspace_root));
        let mut toolbox = ToolBox::new();

        toolbox.add(ReadTextFileTool::new(Arc::clone(&sandbox)));
        toolbox.add(WriteFileTool::new(Arc::clone(&sandbox)));
        toolbox.add(ListDirectoryTool::new(Arc::clone(&sandbox)));
        toolbox.add(CreateDirectoryTool::new(Arc::clone(&sandbox)));
        toolbox.add(GetFileInfoTool::new(sandbox));
        toolbox.add(ReasoningTool::new());

        if matches!(self, Self::Standard | Self::Full) {
            toolbox.add(ShellTool);
        }

        if matches!(self, Self::Full) {
            toolbox.add(BrowserTool::new());
            toolbox.add(BackgroundTool::new());
        }

        toolbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_form_a_chain() {
        let dir = assert_fs::TempDir::new().unwrap();

        let minimal = ToolPreset::Minimal.build(dir.path());
        let standard = ToolPreset::Standard.build(dir.path());
        let full = ToolPreset::Full.build(dir.path());

        for name in minimal.names() {
            assert!(standard.contains(&name), "standard missing {name}");
        }
        for name in standard.names() {
            assert!(full.contains(&name), "full missing {name}");
        }
        assert!(minimal.len() < standard.len());
        assert!(standard.len() < full.len());
    }

    #[test]
    fn standard_adds_shell_full_adds_browser_and_background() {
        let dir = assert_fs::TempDir::new().unwrap();

        let minimal = ToolPreset::Minimal.build(dir.path());
        assert!(!minimal.contains("shell"));
        assert!(minimal.contains("read_text_file"));
        assert!(minimal.contains("deep_reasoning"));

        let standard = ToolPreset::Standard.build(dir.path());
        assert!(standard.contains("shell"));
        assert!(!standard.contains("browser"));

        let full = ToolPreset::Full.build(dir.path());
        assert!(full.contains("browser"));
        assert!(full.contains("background_process"));
    }

    #[test]
    fn builds_are_isolated() {
        let dir = assert_fs::TempDir::new().unwrap();
        let a = ToolPreset::Standard.build(dir.path());
        let b = ToolPreset::Standard.build(dir.path());
        // Two builds hold distinct instances; nothing is shared.
        assert_eq!(a.names(), b.names());
        assert!(!std::ptr::eq(
            std::ptr::from_ref(a.get("shell").unwrap()),
            std::ptr::from_ref(b.get("shell").unwrap()),
        ));
    }

    #[test]
    fn parse_round_trips() {
        for preset in [ToolPreset::Minimal, ToolPreset::Standard, ToolPreset::Full] {
            assert_eq!(ToolPreset::parse(preset.as_str()), Some(preset));
        }
        assert_eq!(ToolPreset::parse("everything"), None);
    }
}
