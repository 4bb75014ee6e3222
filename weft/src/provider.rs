//! The model provider interface.
//!
//! A provider is responsible for exactly one model turn: given the
//! conversation history and the available tool schemas, it returns an
//! asynchronous sequence of [`StepDelta`]s. Multi-turn orchestration,
//! tool dispatch, and limit enforcement all belong to the tool-loop
//! driver, never to the provider.
//!
//! [`StepAggregator`] folds a delta sequence back into the complete turn
//! the driver appends to history.

pub mod mock;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{Message, ToolCallRequest};
use crate::tool::ToolDefinition;
use crate::usage::Usage;

/// Why a model turn (or a whole run) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// The model produced a final answer.
    Stop,
    /// The model requested tool execution.
    ToolCalls,
    /// A step, token, or output budget was exhausted.
    Length,
    /// The turn ended with an error.
    Error,
}

impl FinishReason {
    /// Get the kebab-case wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::ToolCalls => "tool-calls",
            Self::Length => "length",
            Self::Error => "error",
        }
    }
}

/// One increment of a model turn.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StepDelta {
    /// Incremental text content.
    Text(String),
    /// Incremental reasoning content.
    Reasoning(String),
    /// A complete tool call request.
    ToolCall(ToolCallRequest),
    /// Token usage for the turn.
    Usage(Usage),
    /// The turn is complete.
    Finish(FinishReason),
}

/// Per-turn options passed to the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct StepOptions {
    /// Cap on output tokens for this turn, if any.
    pub max_output_tokens: Option<u64>,
}

/// The boxed delta stream returned by a provider step.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StepDelta, ProviderError>> + Send>>;

/// Uniform single-turn contract over model providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Execute one model turn and stream its deltas.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the turn cannot be started; errors
    /// mid-turn are yielded through the stream.
    async fn step(
        &self,
        history: &[Message],
        tools: &[ToolDefinition],
        options: &StepOptions,
    ) -> Result<DeltaStream, ProviderError>;
}

/// Folds a delta sequence into the completed turn.
///
/// The driver feeds every delta it forwards to the stream bus into an
/// aggregator, then reads the assembled turn off it once the provider
/// signals `Finish`.
#[derive(Debug, Default)]
pub struct StepAggregator {
    text: String,
    reasoning: String,
    tool_calls: Vec<ToolCallRequest>,
    usage: Option<Usage>,
    finish_reason: Option<FinishReason>,
}

impl StepAggregator {
    /// Create an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one delta.
    pub fn apply(&mut self, delta: &StepDelta) {
        match delta {
            StepDelta::Text(chunk) => self.text.push_str(chunk),
            StepDelta::Reasoning(chunk) => self.reasoning.push_str(chunk),
            StepDelta::ToolCall(call) => self.tool_calls.push(call.clone()),
            StepDelta::Usage(usage) => self.usage = Some(*usage),
            StepDelta::Finish(reason) => self.finish_reason = Some(*reason),
        }
    }

    /// The accumulated text so far.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The accumulated tool calls so far.
    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        &self.tool_calls
    }

    /// Consume the aggregator into its parts.
    ///
    /// The finish reason defaults to [`FinishReason::Stop`] when the
    /// provider never emitted one but the stream ended cleanly; a turn
    /// with pending tool calls reports [`FinishReason::ToolCalls`].
    #[must_use]
    pub fn finish(self) -> CompletedTurn {
        let finish_reason = self.finish_reason.unwrap_or({
            if self.tool_calls.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolCalls
            }
        });
        CompletedTurn {
            text: self.text,
            reasoning: (!self.reasoning.is_empty()).then_some(self.reasoning),
            tool_calls: self.tool_calls,
            usage: self.usage,
            finish_reason,
        }
    }
}

/// A fully assembled model turn.
#[derive(Debug, Clone)]
pub struct CompletedTurn {
    /// Final text content of the turn.
    pub text: String,
    /// Reasoning content, if the model emitted any.
    pub reasoning: Option<String>,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Usage reported for the turn, if any.
    pub usage: Option<Usage>,
    /// Why the turn ended.
    pub finish_reason: FinishReason,
}
