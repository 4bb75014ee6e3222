//! Scripted provider for tests and examples.
//!
//! [`MockProvider`] replays a fixed script of turns without touching the
//! network, so loop, workflow, team, and eval behavior can be exercised
//! deterministically.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::message::{Message, ToolCallRequest};
use crate::tool::ToolDefinition;
use crate::usage::Usage;

use super::{DeltaStream, FinishReason, ModelProvider, StepDelta, StepOptions};

/// One scripted model turn.
#[derive(Debug, Clone, Default)]
pub struct MockTurn {
    /// Text chunks to stream, in order.
    pub text: Vec<String>,
    /// Reasoning chunks to stream before the text.
    pub reasoning: Vec<String>,
    /// Tool calls to request.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Usage to report for the turn.
    pub usage: Option<Usage>,
    /// Explicit finish reason; inferred from `tool_calls` when `None`.
    pub finish_reason: Option<FinishReason>,
    /// Artificial latency before the first delta.
    pub delay: Option<Duration>,
}

impl MockTurn {
    /// A turn that answers with plain text and stops.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            text: vec![content.into()],
            ..Self::default()
        }
    }

    /// A turn that requests a single tool call.
    #[must_use]
    pub fn tool_call(call_id: impl Into<String>, tool_name: impl Into<String>, input: Value) -> Self {
        Self {
            tool_calls: vec![ToolCallRequest::new(call_id, tool_name, input)],
            ..Self::default()
        }
    }

    /// Add another tool call to the turn.
    #[must_use]
    pub fn and_tool_call(
        mut self,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: Value,
    ) -> Self {
        self.tool_calls
            .push(ToolCallRequest::new(call_id, tool_name, input));
        self
    }

    /// Attach reasoning chunks streamed before the text.
    #[must_use]
    pub fn with_reasoning(mut self, chunks: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.reasoning = chunks.into_iter().map(Into::into).collect();
        self
    }

    /// Attach usage to the turn.
    #[must_use]
    pub const fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Force a finish reason.
    #[must_use]
    pub const fn with_finish(mut self, reason: FinishReason) -> Self {
        self.finish_reason = Some(reason);
        self
    }

    /// Delay the turn's first delta, for concurrency tests.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn into_deltas(self) -> Vec<StepDelta> {
        let finish = self.finish_reason.unwrap_or({
            if self.tool_calls.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolCalls
            }
        });

        let mut deltas = Vec::new();
        for chunk in self.reasoning {
            deltas.push(StepDelta::Reasoning(chunk));
        }
        for chunk in self.text {
            deltas.push(StepDelta::Text(chunk));
        }
        for call in self.tool_calls {
            deltas.push(StepDelta::ToolCall(call));
        }
        if let Some(usage) = self.usage {
            deltas.push(StepDelta::Usage(usage));
        }
        deltas.push(StepDelta::Finish(finish));
        deltas
    }
}

/// A provider that replays a script of [`MockTurn`]s in sequence.
///
/// Once the script is exhausted, further steps answer with an empty
/// `stop` turn so a looping driver always terminates.
#[derive(Debug)]
pub struct MockProvider {
    turns: Vec<MockTurn>,
    cursor: AtomicUsize,
    cycle: bool,
    fail_with: Option<ProviderError>,
}

impl MockProvider {
    /// Create a provider replaying the given turns.
    #[must_use]
    pub fn new(turns: Vec<MockTurn>) -> Self {
        Self {
            turns,
            cursor: AtomicUsize::new(0),
            cycle: false,
            fail_with: None,
        }
    }

    /// Create a provider that answers every step with the same text.
    #[must_use]
    pub fn always(content: impl Into<String>) -> Self {
        Self::new(vec![MockTurn::text(content)]).repeating()
    }

    /// Create a provider whose first step fails with the given error.
    #[must_use]
    pub fn failing(error: ProviderError) -> Self {
        Self {
            turns: Vec::new(),
            cursor: AtomicUsize::new(0),
            cycle: false,
            fail_with: Some(error),
        }
    }

    /// Replay the script cyclically instead of padding with stop turns.
    #[must_use]
    pub const fn repeating(mut self) -> Self {
        self.cycle = true;
        self
    }

    /// Number of steps served so far.
    #[must_use]
    pub fn steps_served(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    fn next_turn(&self) -> MockTurn {
        let raw = self.cursor.fetch_add(1, Ordering::SeqCst);
        let index = if self.cycle && !self.turns.is_empty() {
            raw % self.turns.len()
        } else {
            raw
        };
        self.turns.get(index).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn step(
        &self,
        _history: &[Message],
        _tools: &[ToolDefinition],
        _options: &StepOptions,
    ) -> Result<DeltaStream, ProviderError> {
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }

        let turn = self.next_turn();
        let delay = turn.delay;
        let deltas = turn.into_deltas();

        let stream = async_stream::stream! {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            for delta in deltas {
                yield Ok(delta);
            }
        };
        Ok(Box::pin(stream))
    }
}
