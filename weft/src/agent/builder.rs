//! Agent construction.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::approval::ApprovalConfig;
use crate::error::{Error, Result};
use crate::provider::ModelProvider;
use crate::tool::{BoxedTool, DynTool};
use crate::tools::ToolPreset;
use crate::usage::UsageLimits;

use super::config::AgentConfig;
use super::Agent;

/// Builder for [`Agent`].
///
/// A provider is required; everything else has defaults matching the
/// workspace configuration contract (25 steps, `standard` preset,
/// approval off, no usage limits).
#[derive(Default)]
pub struct AgentBuilder {
    provider: Option<Arc<dyn ModelProvider>>,
    workspace_root: Option<PathBuf>,
    agent_id: Option<String>,
    role: Option<String>,
    max_steps: Option<usize>,
    usage_limits: UsageLimits,
    system_prompt: Option<String>,
    preset: ToolPreset,
    approval: Option<ApprovalConfig>,
    extra_tools: Vec<BoxedTool>,
    bus_capacity: Option<usize>,
    run_timeout: Option<Duration>,
}

impl AgentBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model provider.
    #[must_use]
    pub fn provider(mut self, provider: impl ModelProvider + 'static) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Set the model provider from a shared handle.
    #[must_use]
    pub fn provider_arc(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the sandbox/workspace root. Defaults to the current directory.
    #[must_use]
    pub fn workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    /// Set the agent id. A random one is generated when absent.
    #[must_use]
    pub fn agent_id(mut self, id: impl Into<String>) -> Self {
        self.agent_id = Some(id.into());
        self
    }

    /// Set the role description.
    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Set the maximum steps per run (default 25).
    #[must_use]
    pub const fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// Set usage limits.
    #[must_use]
    pub const fn usage_limits(mut self, limits: UsageLimits) -> Self {
        self.usage_limits = limits;
        self
    }

    /// Set the system prompt.
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Choose the tool preset (default `standard`).
    #[must_use]
    pub const fn preset(mut self, preset: ToolPreset) -> Self {
        self.preset = preset;
        self
    }

    /// Enable approval gating with the default dangerous-tool set.
    #[must_use]
    pub fn approval(mut self) -> Self {
        self.approval = Some(ApprovalConfig::default());
        self
    }

    /// Enable approval gating with a custom configuration.
    #[must_use]
    pub fn approval_config(mut self, config: ApprovalConfig) -> Self {
        self.approval = Some(config);
        self
    }

    /// Add a tool beyond the preset.
    #[must_use]
    pub fn tool(mut self, tool: impl DynTool + 'static) -> Self {
        self.extra_tools.push(Box::new(tool));
        self
    }

    /// Set the per-run event bus capacity.
    #[must_use]
    pub const fn bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = Some(capacity);
        self
    }

    /// Bound whole-run wall-clock time; handler timeouts shrink to fit.
    #[must_use]
    pub const fn run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// Build the agent.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when no provider is set or the workspace
    /// root cannot be resolved.
    pub fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| Error::configuration("agent requires a provider"))?;

        let workspace_root = match self.workspace_root {
            Some(root) => root,
            None => std::env::current_dir()
                .map_err(|e| Error::configuration(format!("cannot resolve workspace root: {e}")))?,
        };

        let mut config = AgentConfig::new(workspace_root);
        if let Some(id) = self.agent_id {
            if id.is_empty() {
                return Err(Error::configuration("agent id must not be empty"));
            }
            config.agent_id = id;
        }
        if let Some(role) = self.role {
            config.role = role;
        }
        if let Some(max_steps) = self.max_steps {
            config.max_steps = max_steps;
        }
        if let Some(capacity) = self.bus_capacity {
            config.bus_capacity = capacity;
        }
        config.usage_limits = self.usage_limits;
        config.system_prompt = self.system_prompt;
        config.preset = self.preset;
        config.run_timeout = self.run_timeout;

        let mut toolbox = config.preset.build(&config.workspace_root);
        for tool in self.extra_tools {
            toolbox.add_boxed(tool);
        }
        if let Some(approval) = &self.approval {
            toolbox = approval.gate(toolbox);
        }

        Ok(Agent::from_parts(config, provider, toolbox, self.approval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockProvider;

    #[test]
    fn requires_a_provider() {
        let err = AgentBuilder::new().build().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn builds_with_defaults() {
        let agent = AgentBuilder::new()
            .provider(MockProvider::always("ok"))
            .workspace_root("/tmp")
            .build()
            .unwrap();
        assert_eq!(agent.role(), "assistant");
        assert!(agent.tool_names().contains(&"shell".to_owned()));
    }

    #[test]
    fn rejects_empty_agent_id() {
        let err = AgentBuilder::new()
            .provider(MockProvider::always("ok"))
            .workspace_root("/tmp")
            .agent_id("")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn approval_gates_the_dangerous_tools() {
        let agent = AgentBuilder::new()
            .provider(MockProvider::always("ok"))
            .workspace_root("/tmp")
            .approval()
            .build()
            .unwrap();
        assert!(agent.tool_names().contains(&"shell".to_owned()));
    }
}
