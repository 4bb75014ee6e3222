//! The tool approval gate.
//!
//! Tools declared dangerous are gated: before dispatch, the driver emits
//! an `approval-requested` tool result and suspends the call. Resolution
//! comes either from a registered [`ApprovalHandler`] raced against the
//! configured timeout, or from the caller pushing a response through
//! [`ApprovalRegistry::record`]. Responses are write-once per call id;
//! later responses for the same id are ignored.
//!
//! Gating derives new tool objects; the originals are never mutated.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;
use crate::tool::{BoxedTool, Durability, DynTool, ToolBox, ToolContext, ToolDefinition};

/// Default set of tool names that require approval when gating is enabled.
pub const DEFAULT_APPROVAL_TOOLS: &[&str] = &[
    "shell",
    "browser",
    "write_file",
    "edit_file",
    "create_directory",
];

/// Default approval timeout.
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(120);

/// What to do when an approval handler does not answer in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeoutAction {
    /// Approve the call.
    Approve,
    /// Deny the call.
    #[default]
    Deny,
}

/// A request for caller consent before a tool call executes.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    /// The suspended call id.
    pub call_id: String,
    /// Tool awaiting approval.
    pub tool_name: String,
    /// The validated input the tool would receive.
    pub input: Value,
}

/// Async approval decision source.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    /// Decide whether the call may execute.
    async fn decide(&self, request: &ApprovalRequest) -> bool;
}

/// Handler that approves every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproveAll;

#[async_trait]
impl ApprovalHandler for ApproveAll {
    async fn decide(&self, _request: &ApprovalRequest) -> bool {
        true
    }
}

/// Handler that denies every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

#[async_trait]
impl ApprovalHandler for DenyAll {
    async fn decide(&self, _request: &ApprovalRequest) -> bool {
        false
    }
}

/// Configuration for the approval gate.
#[derive(Clone)]
pub struct ApprovalConfig {
    /// Tool names requiring approval.
    pub tools: Vec<String>,
    /// How long to wait for a handler decision.
    pub timeout: Duration,
    /// Applied when the handler times out.
    pub timeout_action: TimeoutAction,
    /// Decision source; when absent, the caller must push responses.
    pub handler: Option<Arc<dyn ApprovalHandler>>,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            tools: DEFAULT_APPROVAL_TOOLS.iter().map(ToString::to_string).collect(),
            timeout: DEFAULT_APPROVAL_TIMEOUT,
            timeout_action: TimeoutAction::default(),
            handler: None,
        }
    }
}

impl fmt::Debug for ApprovalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovalConfig")
            .field("tools", &self.tools)
            .field("timeout", &self.timeout)
            .field("timeout_action", &self.timeout_action)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl ApprovalConfig {
    /// Restrict gating to the given tool names.
    #[must_use]
    pub fn with_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Set the handler timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the action applied on handler timeout.
    #[must_use]
    pub const fn with_timeout_action(mut self, action: TimeoutAction) -> Self {
        self.timeout_action = action;
        self
    }

    /// Install a decision handler.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Whether gating applies to the named tool.
    #[must_use]
    pub fn covers(&self, tool_name: &str) -> bool {
        self.tools.iter().any(|t| t == tool_name)
    }

    /// Derive a gated toolbox: listed tools are wrapped so they report
    /// `needs_approval`, others pass through untouched.
    #[must_use]
    pub fn gate(&self, toolbox: ToolBox) -> ToolBox {
        let mut gated = ToolBox::new();
        let names = toolbox.names();
        let mut source = toolbox;
        for name in names {
            // Rebuilding moves each tool out exactly once.
            if let Some(tool) = source.take(&name) {
                if self.covers(&name) {
                    gated.add_boxed(Box::new(GatedTool { inner: tool }));
                } else {
                    gated.add_boxed(tool);
                }
            }
        }
        gated
    }
}

/// Derived tool reporting `needs_approval` without mutating the original.
struct GatedTool {
    inner: BoxedTool,
}

#[async_trait]
impl DynTool for GatedTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> String {
        self.inner.description()
    }

    fn definition(&self) -> ToolDefinition {
        self.inner.definition()
    }

    fn durability(&self) -> Durability {
        self.inner.durability()
    }

    fn needs_approval(&self) -> bool {
        true
    }

    async fn call_json(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        self.inner.call_json(args, ctx).await
    }
}

/// Per-run, write-once approval response registry.
///
/// The first response recorded for a call id wins; subsequent responses
/// are ignored. Waiters are woken on every record.
#[derive(Debug, Default)]
pub struct ApprovalRegistry {
    responses: Mutex<HashMap<String, bool>>,
    notify: Notify,
}

impl ApprovalRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a response. Returns `false` if one already existed.
    pub async fn record(&self, call_id: impl Into<String>, approved: bool) -> bool {
        let call_id = call_id.into();
        let inserted = {
            let mut responses = self.responses.lock().await;
            if responses.contains_key(&call_id) {
                false
            } else {
                responses.insert(call_id, approved);
                true
            }
        };
        if inserted {
            self.notify.notify_waiters();
        }
        inserted
    }

    /// The recorded response for a call id, if any.
    pub async fn get(&self, call_id: &str) -> Option<bool> {
        self.responses.lock().await.get(call_id).copied()
    }

    /// Wait until a response for `call_id` arrives.
    ///
    /// Event-driven: the task parks on a notifier between checks.
    pub async fn wait(&self, call_id: &str) -> bool {
        loop {
            // Register interest before the check to avoid a lost wakeup.
            let notified = self.notify.notified();
            if let Some(approved) = self.get(call_id).await {
                return approved;
            }
            notified.await;
        }
    }
}

/// Resolve a suspended call according to the gate configuration.
///
/// With a handler configured, the handler races the timeout inside one
/// scope: whichever side finishes first cancels the other, and the
/// timeout applies `timeout_action`. Without a handler, the call blocks
/// until the caller records a response or the run is cancelled (denied).
///
/// The outcome is recorded in the registry exactly once either way.
pub async fn resolve_approval(
    config: &ApprovalConfig,
    registry: &ApprovalRegistry,
    request: &ApprovalRequest,
    cancel: &CancellationToken,
) -> bool {
    // A response pushed before suspension wins immediately.
    if let Some(approved) = registry.get(&request.call_id).await {
        return approved;
    }

    let approved = if let Some(handler) = &config.handler {
        tokio::select! {
            decision = handler.decide(request) => decision,
            () = tokio::time::sleep(config.timeout) => {
                matches!(config.timeout_action, TimeoutAction::Approve)
            }
            () = cancel.cancelled() => false,
        }
    } else {
        tokio::select! {
            approved = registry.wait(&request.call_id) => approved,
            () = cancel.cancelled() => false,
        }
    };

    registry.record(request.call_id.clone(), approved).await;
    approved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(call_id: &str) -> ApprovalRequest {
        ApprovalRequest {
            call_id: call_id.into(),
            tool_name: "shell".into(),
            input: serde_json::json!({"command": "rm -r build"}),
        }
    }

    mod registry {
        use super::*;

        #[tokio::test]
        async fn first_response_wins() {
            let registry = ApprovalRegistry::new();
            assert!(registry.record("c1", true).await);
            assert!(!registry.record("c1", false).await);
            assert_eq!(registry.get("c1").await, Some(true));
        }

        #[tokio::test]
        async fn wait_wakes_on_record() {
            let registry = Arc::new(ApprovalRegistry::new());

            let waiter = {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.wait("c1").await })
            };

            tokio::time::sleep(Duration::from_millis(10)).await;
            registry.record("c1", true).await;
            assert!(waiter.await.unwrap());
        }
    }

    mod resolution {
        use super::*;

        struct SlowHandler;

        #[async_trait]
        impl ApprovalHandler for SlowHandler {
            async fn decide(&self, _request: &ApprovalRequest) -> bool {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                true
            }
        }

        #[tokio::test]
        async fn handler_decision_is_used() {
            let config = ApprovalConfig::default().with_handler(Arc::new(ApproveAll));
            let registry = ApprovalRegistry::new();
            let cancel = CancellationToken::new();

            assert!(resolve_approval(&config, &registry, &request("c1"), &cancel).await);
            assert_eq!(registry.get("c1").await, Some(true));
        }

        #[tokio::test(start_paused = true)]
        async fn timeout_applies_configured_action() {
            let config = ApprovalConfig::default()
                .with_handler(Arc::new(SlowHandler))
                .with_timeout(Duration::from_millis(50))
                .with_timeout_action(TimeoutAction::Deny);
            let registry = ApprovalRegistry::new();
            let cancel = CancellationToken::new();

            assert!(!resolve_approval(&config, &registry, &request("c1"), &cancel).await);

            let config = config.with_timeout_action(TimeoutAction::Approve);
            assert!(resolve_approval(&config, &registry, &request("c2"), &cancel).await);
        }

        #[tokio::test]
        async fn no_handler_blocks_until_response() {
            let config = ApprovalConfig::default();
            let registry = Arc::new(ApprovalRegistry::new());
            let cancel = CancellationToken::new();

            let resolver = {
                let registry = Arc::clone(&registry);
                let config = config.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    resolve_approval(&config, &registry, &request("c1"), &cancel).await
                })
            };

            tokio::time::sleep(Duration::from_millis(10)).await;
            registry.record("c1", true).await;
            assert!(resolver.await.unwrap());
        }

        #[tokio::test]
        async fn cancellation_resolves_as_denied() {
            let config = ApprovalConfig::default();
            let registry = ApprovalRegistry::new();
            let cancel = CancellationToken::new();
            cancel.cancel();

            assert!(!resolve_approval(&config, &registry, &request("c1"), &cancel).await);
        }

        #[tokio::test]
        async fn double_response_keeps_first_resolution() {
            let registry = ApprovalRegistry::new();
            registry.record("c1", false).await;
            registry.record("c1", true).await;

            let config = ApprovalConfig::default();
            let cancel = CancellationToken::new();
            assert!(!resolve_approval(&config, &registry, &request("c1"), &cancel).await);
        }
    }

    mod gating {
        use super::*;
        use crate::tool::Tool;
        use serde::{Deserialize, Serialize};

        struct ShellLike;

        #[derive(Deserialize)]
        struct Args {
            #[allow(dead_code)]
            command: String,
        }

        #[derive(Serialize)]
        struct Output {
            success: bool,
        }

        #[async_trait]
        impl Tool for ShellLike {
            const NAME: &'static str = "shell";
            type Args = Args;
            type Output = Output;
            type Error = ToolError;

            fn description(&self) -> String {
                "Run a command.".to_owned()
            }

            fn parameters_schema(&self) -> Value {
                serde_json::json!({"type": "object", "required": ["command"]})
            }

            async fn call(
                &self,
                _args: Self::Args,
                _ctx: &ToolContext,
            ) -> Result<Self::Output, Self::Error> {
                Ok(Output { success: true })
            }
        }

        #[test]
        fn default_config_covers_dangerous_set() {
            let config = ApprovalConfig::default();
            assert!(config.covers("shell"));
            assert!(config.covers("write_file"));
            assert!(!config.covers("read_text_file"));
        }

        #[tokio::test]
        async fn gated_tool_reports_needs_approval_and_still_works() {
            let mut toolbox = ToolBox::new();
            toolbox.add(ShellLike);
            assert!(!toolbox.get("shell").unwrap().needs_approval());

            let gated = ApprovalConfig::default().gate(toolbox);
            let tool = gated.get("shell").unwrap();
            assert!(tool.needs_approval());

            let ctx = ToolContext::detached();
            let payload = tool
                .call_json(serde_json::json!({"command": "true"}), &ctx)
                .await
                .unwrap();
            assert!(payload.contains("success"));
        }
    }
}
