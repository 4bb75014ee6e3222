//! Agents: configuration, construction, and the run API.
//!
//! An [`Agent`] is a configuration snapshot plus a provider and a
//! toolbox. Each `generate`/`stream` call spawns an isolated run with
//! its own step counter, usage totals, and event bus; nothing global is
//! mutated.
//!
//! `generate` is literally a fold over `stream`'s events, so both paths
//! exercise identical driver behavior.

mod builder;
mod config;
mod result;
mod runner;

pub use builder::AgentBuilder;
pub use config::{AgentConfig, DEFAULT_MAX_STEPS};
pub use result::{RunCollector, RunResult, StepRecord};

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::approval::{ApprovalConfig, ApprovalRegistry};
use crate::provider::ModelProvider;
use crate::stream::{EventStream, event_bus};
use crate::tool::{BoxedTool, ToolBox};

use runner::Runner;

pub(crate) struct AgentInner {
    pub(crate) config: AgentConfig,
    pub(crate) provider: Arc<dyn ModelProvider>,
    pub(crate) toolbox: ToolBox,
    pub(crate) approval: Option<ApprovalConfig>,
    pub(crate) approvals: ApprovalRegistry,
    current_cancel: Mutex<CancellationToken>,
}

/// A configured agent. Cheap to clone; clones share the snapshot.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

impl Agent {
    /// Start building an agent.
    #[must_use]
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub(crate) fn from_parts(
        config: AgentConfig,
        provider: Arc<dyn ModelProvider>,
        toolbox: ToolBox,
        approval: Option<ApprovalConfig>,
    ) -> Self {
        Self {
            inner: Arc::new(AgentInner {
                config,
                provider,
                toolbox,
                approval,
                approvals: ApprovalRegistry::new(),
                current_cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Derive an agent sharing this one's configuration and provider,
    /// with extra tools added to a freshly built preset toolbox.
    ///
    /// Used by teams to equip members with coordination tools without
    /// mutating the original agent.
    #[must_use]
    pub fn with_additional_tools(&self, extra: Vec<BoxedTool>) -> Self {
        let config = self.inner.config.clone();
        let mut toolbox = config.preset.build(&config.workspace_root);
        for tool in extra {
            toolbox.add_boxed(tool);
        }
        let approval = self.inner.approval.clone();
        if let Some(approval) = &approval {
            toolbox = approval.gate(toolbox);
        }
        Self::from_parts(config, Arc::clone(&self.inner.provider), toolbox, approval)
    }

    /// Run to completion and return the aggregate result.
    pub async fn generate(&self, prompt: impl Into<String>) -> RunResult {
        let mut events = self.stream(prompt);
        let mut collector = RunCollector::new();
        while let Some(event) = events.next().await {
            collector.apply(&event);
        }
        collector.finish()
    }

    /// Start a run and return its event stream.
    ///
    /// The run executes on a background task; dropping the stream stops
    /// event delivery but the run keeps draining to completion.
    pub fn stream(&self, prompt: impl Into<String>) -> EventStream {
        let (sink, events) = event_bus(self.inner.config.bus_capacity);
        let cancel = CancellationToken::new();
        *self
            .inner
            .current_cancel
            .lock()
            .expect("cancel lock poisoned") = cancel.clone();

        let inner = Arc::clone(&self.inner);
        tokio::spawn(Runner::run(inner, prompt.into(), sink, cancel));
        events
    }

    /// Record an approval response for a suspended tool call.
    ///
    /// Returns `false` when a response for the call id already existed
    /// (the first response always wins).
    pub async fn add_tool_approval_response(&self, call_id: &str, approved: bool) -> bool {
        self.inner.approvals.record(call_id, approved).await
    }

    /// Cancel the most recently started run. Idempotent.
    pub fn cancel(&self) {
        self.inner
            .current_cancel
            .lock()
            .expect("cancel lock poisoned")
            .cancel();
    }

    /// Names of the tools available to this agent.
    #[must_use]
    pub fn tool_names(&self) -> Vec<String> {
        self.inner.toolbox.names()
    }

    /// The configured system prompt, empty when none is set.
    #[must_use]
    pub fn system_prompt(&self) -> &str {
        self.inner.config.system_prompt.as_deref().unwrap_or("")
    }

    /// This agent's id.
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.inner.config.agent_id
    }

    /// This agent's role.
    #[must_use]
    pub fn role(&self) -> &str {
        &self.inner.config.role
    }

    /// The configuration snapshot.
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("agent_id", &self.inner.config.agent_id)
            .field("role", &self.inner.config.role)
            .field("tools", &self.tool_names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures::StreamExt;

    use crate::approval::{ApprovalConfig, TimeoutAction};
    use crate::provider::FinishReason;
    use crate::provider::mock::{MockProvider, MockTurn};
    use crate::stream::StreamEvent;
    use crate::tool::ToolResultState;
    use crate::tools::ToolPreset;
    use crate::usage::{Usage, UsageLimits};

    use super::*;

    fn temp_agent(provider: MockProvider) -> (assert_fs::TempDir, Agent) {
        let dir = assert_fs::TempDir::new().unwrap();
        let agent = Agent::builder()
            .provider(provider)
            .workspace_root(dir.path())
            .build()
            .unwrap();
        (dir, agent)
    }

    #[tokio::test]
    async fn plain_answer_stops_after_one_step() {
        let (_dir, agent) = temp_agent(MockProvider::new(vec![
            MockTurn::text("Hello!").with_usage(Usage::new(10, 2)),
        ]));

        let result = agent.generate("hi").await;
        assert_eq!(result.text, "Hello!");
        assert_eq!(result.step_count(), 1);
        assert_eq!(result.finish_reason, FinishReason::Stop);
        assert_eq!(result.total_usage, Usage::new(10, 2));
    }

    #[tokio::test]
    async fn tool_call_then_answer_is_two_steps() {
        let (_dir, agent) = temp_agent(MockProvider::new(vec![
            MockTurn::tool_call("c1", "shell", serde_json::json!({"command": "echo step"})),
            MockTurn::text("done"),
        ]));

        let result = agent.generate("run it").await;
        assert_eq!(result.step_count(), 2);
        assert!(result.tool_called("shell"));
        assert_eq!(result.text, "done");

        let shell_result = result.steps[0]
            .tool_results
            .iter()
            .find(|r| r.state == ToolResultState::OutputAvailable)
            .unwrap();
        assert!(shell_result.output.as_ref().unwrap().contains("step"));
    }

    #[tokio::test]
    async fn stream_event_order_is_contractual() {
        let (_dir, agent) = temp_agent(MockProvider::new(vec![
            MockTurn::tool_call("c1", "shell", serde_json::json!({"command": "true"})),
            MockTurn::text("fin"),
        ]));

        let events: Vec<StreamEvent> = agent.stream("go").collect().await;
        let types: Vec<&str> = events.iter().map(StreamEvent::wire_type).collect();

        // start-step(1) first, finish last.
        assert_eq!(types.first(), Some(&"start-step"));
        assert_eq!(types.last(), Some(&"finish"));

        // All tool results of step 1 precede finish-step(1); step 2 has none.
        let finish1 = types.iter().position(|t| *t == "finish-step").unwrap();
        let last_tool_result = types.iter().rposition(|t| *t == "tool-result").unwrap();
        assert!(last_tool_result < finish1);

        // start-step(2) strictly after finish-step(1).
        let second_start = types.iter().rposition(|t| *t == "start-step").unwrap();
        assert!(second_start > finish1);
    }

    #[tokio::test]
    async fn max_steps_zero_finishes_immediately() {
        let dir = assert_fs::TempDir::new().unwrap();
        let agent = Agent::builder()
            .provider(MockProvider::always("never"))
            .workspace_root(dir.path())
            .max_steps(0)
            .build()
            .unwrap();

        let events: Vec<StreamEvent> = agent.stream("go").collect().await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Finish { reason, cancelled } => {
                assert_eq!(*reason, FinishReason::Length);
                assert!(!cancelled);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn max_steps_exhaustion_finishes_with_length() {
        let dir = assert_fs::TempDir::new().unwrap();
        let provider = MockProvider::new(vec![
            MockTurn::tool_call("c1", "shell", serde_json::json!({"command": "true"})),
            MockTurn::tool_call("c2", "shell", serde_json::json!({"command": "true"})),
        ])
        .repeating();
        let agent = Agent::builder()
            .provider(provider)
            .workspace_root(dir.path())
            .max_steps(2)
            .build()
            .unwrap();

        let result = agent.generate("loop forever").await;
        assert_eq!(result.step_count(), 2);
        assert_eq!(result.finish_reason, FinishReason::Length);
    }

    #[tokio::test]
    async fn usage_limit_terminates_with_length_after_tools_ran() {
        let dir = assert_fs::TempDir::new().unwrap();
        let provider = MockProvider::new(vec![
            MockTurn::tool_call("c1", "shell", serde_json::json!({"command": "echo executed"}))
                .with_usage(Usage::new(500, 200)),
            MockTurn::text("unreachable").with_usage(Usage::new(300, 200)),
        ]);
        let agent = Agent::builder()
            .provider(provider)
            .workspace_root(dir.path())
            .usage_limits(UsageLimits::none().with_max_requests(1))
            .build()
            .unwrap();

        let result = agent.generate("go").await;
        // Step 1's tool calls still executed before termination.
        assert_eq!(result.step_count(), 1);
        assert!(result.tool_called("shell"));
        assert_eq!(result.finish_reason, FinishReason::Length);
    }

    #[tokio::test]
    async fn total_token_limit_trips_after_second_step() {
        let dir = assert_fs::TempDir::new().unwrap();
        let provider = MockProvider::new(vec![
            MockTurn::tool_call("c1", "shell", serde_json::json!({"command": "true"}))
                .with_usage(Usage::new(500, 200)),
            MockTurn::tool_call("c2", "shell", serde_json::json!({"command": "true"}))
                .with_usage(Usage::new(300, 200)),
            MockTurn::text("never"),
        ]);
        let agent = Agent::builder()
            .provider(provider)
            .workspace_root(dir.path())
            .usage_limits(UsageLimits::none().with_max_total_tokens(1000))
            .build()
            .unwrap();

        let result = agent.generate("go").await;
        assert_eq!(result.step_count(), 2);
        assert_eq!(result.total_usage.total_tokens, 1200);
        assert_eq!(result.finish_reason, FinishReason::Length);
    }

    #[tokio::test]
    async fn provider_error_emits_error_then_finish() {
        let dir = assert_fs::TempDir::new().unwrap();
        let agent = Agent::builder()
            .provider(MockProvider::failing(
                crate::error::ProviderError::Unavailable("down".into()),
            ))
            .workspace_root(dir.path())
            .build()
            .unwrap();

        let events: Vec<StreamEvent> = agent.stream("go").collect().await;
        let types: Vec<&str> = events.iter().map(StreamEvent::wire_type).collect();
        assert!(types.contains(&"error"));
        assert_eq!(types.last(), Some(&"finish"));
    }

    #[tokio::test]
    async fn blocked_shell_command_continues_the_run() {
        let (_dir, agent) = temp_agent(MockProvider::new(vec![
            MockTurn::tool_call("c1", "shell", serde_json::json!({"command": "rm -rf /"})),
            MockTurn::text("recovered"),
        ]));

        let result = agent.generate("dangerous").await;
        assert_eq!(result.finish_reason, FinishReason::Stop);
        assert_eq!(result.text, "recovered");

        let error_result = &result.steps[0].tool_results[0];
        assert_eq!(error_result.state, ToolResultState::OutputError);
        assert!(error_result.error_text.as_ref().unwrap().contains("command-blocked"));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_to_the_model() {
        let (_dir, agent) = temp_agent(MockProvider::new(vec![
            MockTurn::tool_call("c1", "teleport", serde_json::json!({})),
            MockTurn::text("ok"),
        ]));

        let result = agent.generate("go").await;
        let update = &result.steps[0].tool_results[0];
        assert_eq!(update.state, ToolResultState::OutputError);
        assert!(update.error_text.as_ref().unwrap().contains("not-found"));
    }

    #[tokio::test]
    async fn invalid_input_fails_validation_before_dispatch() {
        let (_dir, agent) = temp_agent(MockProvider::new(vec![
            // `command` must be a string.
            MockTurn::tool_call("c1", "shell", serde_json::json!({"command": 42})),
            MockTurn::text("ok"),
        ]));

        let result = agent.generate("go").await;
        let update = &result.steps[0].tool_results[0];
        assert_eq!(update.state, ToolResultState::OutputError);
        assert!(update.error_text.as_ref().unwrap().contains("validation-failed"));
    }

    #[tokio::test]
    async fn approval_with_handler_timeout_denies_by_default() {
        let dir = assert_fs::TempDir::new().unwrap();
        let provider = MockProvider::new(vec![
            MockTurn::tool_call("c1", "shell", serde_json::json!({"command": "echo hi"})),
            MockTurn::text("after"),
        ]);

        struct Never;
        #[async_trait::async_trait]
        impl crate::approval::ApprovalHandler for Never {
            async fn decide(&self, _request: &crate::approval::ApprovalRequest) -> bool {
                std::future::pending().await
            }
        }

        let agent = Agent::builder()
            .provider(provider)
            .workspace_root(dir.path())
            .approval_config(
                ApprovalConfig::default()
                    .with_handler(Arc::new(Never))
                    .with_timeout(Duration::from_millis(50))
                    .with_timeout_action(TimeoutAction::Deny),
            )
            .build()
            .unwrap();

        let result = agent.generate("go").await;
        let states: Vec<ToolResultState> = result.steps[0]
            .tool_results
            .iter()
            .map(|r| r.state)
            .collect();
        assert!(states.contains(&ToolResultState::ApprovalRequested));
        assert!(states.contains(&ToolResultState::OutputDenied));
    }

    #[tokio::test]
    async fn caller_pushed_approval_unblocks_the_run() {
        let dir = assert_fs::TempDir::new().unwrap();
        let provider = MockProvider::new(vec![
            MockTurn::tool_call("call-77", "shell", serde_json::json!({"command": "echo approved"})),
            MockTurn::text("after"),
        ]);
        let agent = Agent::builder()
            .provider(provider)
            .workspace_root(dir.path())
            .approval()
            .build()
            .unwrap();

        let mut events = agent.stream("go");
        let mut saw_request = false;
        let mut saw_output = false;
        while let Some(event) = events.next().await {
            if let StreamEvent::ToolResult(update) = &event {
                match update.state {
                    ToolResultState::ApprovalRequested => {
                        saw_request = true;
                        assert!(agent.add_tool_approval_response("call-77", true).await);
                    }
                    ToolResultState::OutputAvailable => saw_output = true,
                    _ => {}
                }
            }
        }
        assert!(saw_request);
        assert!(saw_output);
    }

    #[tokio::test]
    async fn double_approval_response_keeps_the_first() {
        let (_dir, agent) = temp_agent(MockProvider::always("x"));
        assert!(agent.add_tool_approval_response("c9", false).await);
        assert!(!agent.add_tool_approval_response("c9", true).await);
    }

    #[tokio::test]
    async fn cancel_finishes_with_cancelled_error() {
        let dir = assert_fs::TempDir::new().unwrap();
        let provider = MockProvider::new(vec![
            MockTurn::text("slow").with_delay(Duration::from_secs(30)),
        ]);
        let agent = Agent::builder()
            .provider(provider)
            .workspace_root(dir.path())
            .build()
            .unwrap();

        let mut events = agent.stream("go");
        agent.cancel();
        agent.cancel(); // double-cancel is idempotent

        let mut finish = None;
        while let Some(event) = events.next().await {
            if let StreamEvent::Finish { reason, cancelled } = event {
                finish = Some((reason, cancelled));
            }
        }
        assert_eq!(finish, Some((FinishReason::Error, true)));
    }

    #[tokio::test]
    async fn independent_calls_run_concurrently() {
        let dir = assert_fs::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "A").unwrap();
        std::fs::write(dir.path().join("b.txt"), "B").unwrap();

        // Two reads of independent tools in one step.
        let provider = MockProvider::new(vec![
            MockTurn::tool_call("c1", "read_text_file", serde_json::json!({"path": "a.txt"}))
                .and_tool_call("c2", "read_text_file", serde_json::json!({"path": "b.txt"})),
            MockTurn::text("both"),
        ]);
        let agent = Agent::builder()
            .provider(provider)
            .workspace_root(dir.path())
            .preset(ToolPreset::Minimal)
            .build()
            .unwrap();

        let result = agent.generate("read both").await;
        let available = result.steps[0]
            .tool_results
            .iter()
            .filter(|r| r.state == ToolResultState::OutputAvailable)
            .count();
        assert_eq!(available, 2);
        assert_eq!(result.text, "both");
    }

    #[tokio::test]
    async fn retry_envelope_reruns_failed_handlers() {
        use std::sync::atomic::{AtomicU32, Ordering};

        #[derive(Default)]
        struct Flaky {
            attempts: Arc<AtomicU32>,
        }

        #[async_trait::async_trait]
        impl crate::tool::Tool for Flaky {
            const NAME: &'static str = "flaky";
            type Args = serde_json::Value;
            type Output = serde_json::Value;
            type Error = crate::error::ToolError;

            fn description(&self) -> String {
                "fails on the first attempt".into()
            }

            fn parameters_schema(&self) -> serde_json::Value {
                serde_json::json!({"type": "object"})
            }

            fn durability(&self) -> crate::tool::Durability {
                crate::tool::Durability::default().with_retries(1)
            }

            async fn call(
                &self,
                _args: Self::Args,
                _ctx: &crate::tool::ToolContext,
            ) -> Result<Self::Output, Self::Error> {
                if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(crate::error::ToolError::execution("transient"));
                }
                Ok(serde_json::json!({"success": true}))
            }
        }

        let attempts = Arc::new(AtomicU32::new(0));
        let dir = assert_fs::TempDir::new().unwrap();
        let agent = Agent::builder()
            .provider(MockProvider::new(vec![
                MockTurn::tool_call("c1", "flaky", serde_json::json!({})),
                MockTurn::text("done"),
            ]))
            .workspace_root(dir.path())
            .tool(Flaky {
                attempts: Arc::clone(&attempts),
            })
            .build()
            .unwrap();

        let result = agent.generate("go").await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        let update = &result.steps[0].tool_results[0];
        assert_eq!(update.state, ToolResultState::OutputAvailable);
    }

    #[tokio::test]
    async fn derived_agent_gets_extra_tools_without_mutating_original() {
        let (_dir, agent) = temp_agent(MockProvider::always("x"));
        let before = agent.tool_names();

        struct Marker;
        #[async_trait::async_trait]
        impl crate::tool::Tool for Marker {
            const NAME: &'static str = "marker";
            type Args = serde_json::Value;
            type Output = serde_json::Value;
            type Error = crate::error::ToolError;

            fn description(&self) -> String {
                "marker".into()
            }

            fn parameters_schema(&self) -> serde_json::Value {
                serde_json::json!({"type": "object"})
            }

            async fn call(
                &self,
                args: Self::Args,
                _ctx: &crate::tool::ToolContext,
            ) -> Result<Self::Output, Self::Error> {
                Ok(args)
            }
        }

        let derived = agent.with_additional_tools(vec![Box::new(Marker)]);
        assert!(derived.tool_names().contains(&"marker".to_owned()));
        assert_eq!(agent.tool_names(), before);
    }
}
