//! Agent configuration snapshot.

use std::path::PathBuf;
use std::time::Duration;

use crate::tools::ToolPreset;
use crate::usage::UsageLimits;

/// Default maximum number of steps per run.
pub const DEFAULT_MAX_STEPS: usize = 25;

/// Immutable configuration captured at agent construction.
///
/// Runs never mutate the snapshot; every `generate`/`stream` gets its
/// own step counter and usage totals.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Unique id for this agent.
    pub agent_id: String,
    /// Role description, used in team prompts.
    pub role: String,
    /// Root of the filesystem sandbox.
    pub workspace_root: PathBuf,
    /// Maximum steps per run.
    pub max_steps: usize,
    /// Usage guard configuration.
    pub usage_limits: UsageLimits,
    /// System prompt prepended to every run.
    pub system_prompt: Option<String>,
    /// Tool preset the toolbox was built from.
    pub preset: ToolPreset,
    /// Event bus capacity per run.
    pub bus_capacity: usize,
    /// Wall-clock budget for a whole run, bounding handler timeouts.
    pub run_timeout: Option<Duration>,
}

impl AgentConfig {
    /// Create a configuration with defaults for a workspace root.
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            agent_id: format!("agent-{:08x}", fastrand::u32(..)),
            role: "assistant".to_owned(),
            workspace_root: workspace_root.into(),
            max_steps: DEFAULT_MAX_STEPS,
            usage_limits: UsageLimits::none(),
            system_prompt: None,
            preset: ToolPreset::Standard,
            bus_capacity: crate::stream::DEFAULT_BUS_CAPACITY,
            run_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = AgentConfig::new("/tmp/ws");
        assert_eq!(config.max_steps, DEFAULT_MAX_STEPS);
        assert_eq!(config.preset, ToolPreset::Standard);
        assert!(config.usage_limits.is_empty());
        assert!(config.system_prompt.is_none());
        assert!(config.agent_id.starts_with("agent-"));
    }
}
