//! The stream bus: typed events flowing from the provider through the
//! tool-loop driver to the caller.
//!
//! Events travel over a single bounded channel per run. The producer
//! never drops events; when the consumer is slow the producer awaits
//! channel capacity (backpressure). Within a run, delivery order is the
//! emission order.
//!
//! Transient [`DataPart`]s are auxiliary payloads for the caller (file
//! contents, shell output, reasoning traces). They are tagged
//! `data-<subtype>` on the wire and never re-enter the model's
//! conversation context.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::provider::FinishReason;
use crate::tool::ToolResultUpdate;
use crate::usage::Usage;

/// Default bus capacity before producers start awaiting the consumer.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// A transient stream payload that never enters model context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "subtype", rename_all = "kebab-case")]
#[non_exhaustive]
pub enum DataPart {
    /// Content of a file read by the filesystem tool.
    FileContent {
        /// Absolute path that was read.
        path: String,
        /// The (possibly truncated) content.
        content: String,
        /// Whether the content was truncated.
        truncated: bool,
    },

    /// Captured output of a shell command.
    ShellOutput {
        /// The command that ran.
        command: String,
        /// Captured stdout.
        stdout: String,
        /// Captured stderr.
        stderr: String,
        /// Process exit code.
        exit_code: i32,
    },

    /// A search hit produced by a lookup tool.
    SearchResult {
        /// The query that produced the hits.
        query: String,
        /// Structured hits.
        hits: Vec<Value>,
    },

    /// Progress report from a long-running tool.
    ToolProgress {
        /// Name of the reporting tool.
        tool_name: String,
        /// Human-readable progress message.
        message: String,
    },

    /// One thought from the deep-reasoning tool.
    ReasoningStep {
        /// The thought text.
        thought: String,
        /// Position in the thought sequence.
        thought_number: u32,
        /// Current estimate of total thoughts.
        total_thoughts: u32,
        /// Branch this thought belongs to, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        branch_id: Option<String>,
    },

    /// An event forwarded from a sub-agent's run.
    SubAgentStream {
        /// Id of the sub-agent.
        agent_id: String,
        /// The forwarded event, pre-serialized.
        event: Value,
    },

    /// A memory lookup result.
    MemoryResult {
        /// Structured lookup payload.
        payload: Value,
    },
}

impl DataPart {
    /// The kebab-case subtype used in the `data-<subtype>` wire tag.
    #[must_use]
    pub const fn subtype(&self) -> &'static str {
        match self {
            Self::FileContent { .. } => "file-content",
            Self::ShellOutput { .. } => "shell-output",
            Self::SearchResult { .. } => "search-result",
            Self::ToolProgress { .. } => "tool-progress",
            Self::ReasoningStep { .. } => "reasoning-step",
            Self::SubAgentStream { .. } => "sub-agent-stream",
            Self::MemoryResult { .. } => "memory-result",
        }
    }
}

/// Events emitted during a run.
///
/// This is a closed union; consumers should match exhaustively. The wire
/// shape is `{"type": ..., ...fields}` with kebab-case type tags, and
/// `data-<subtype>` for [`StreamEvent::Data`].
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A new step has begun.
    StartStep {
        /// One-based step index.
        step: u32,
    },

    /// A step has finished; all of its tool results were emitted before this.
    FinishStep {
        /// One-based step index.
        step: u32,
        /// Why the model turn ended.
        finish_reason: FinishReason,
        /// Usage reported for the step, if any.
        usage: Option<Usage>,
    },

    /// Reasoning content is starting.
    ReasoningStart,

    /// Incremental reasoning content.
    ReasoningDelta {
        /// The reasoning fragment.
        delta: String,
    },

    /// Reasoning content has ended.
    ReasoningEnd,

    /// Incremental answer text.
    TextDelta {
        /// The text fragment.
        delta: String,
    },

    /// The model requested a tool call.
    ToolCall {
        /// Unique call id.
        call_id: String,
        /// Tool being invoked.
        tool_name: String,
        /// Validated input.
        input: Value,
    },

    /// A tool call progressed to a new result state.
    ToolResult(ToolResultUpdate),

    /// Tool infrastructure failed outside a result state.
    ToolError {
        /// The failing call id.
        call_id: String,
        /// Tool name.
        tool_name: String,
        /// Error description.
        error: String,
    },

    /// A transient data part.
    Data(DataPart),

    /// The run ended. Always the final event, even after `Error`.
    Finish {
        /// Terminal reason for the run.
        reason: FinishReason,
        /// Set when the run was cancelled by the caller.
        cancelled: bool,
    },

    /// A run-level error. Followed by a `Finish` event.
    Error {
        /// Error description.
        message: String,
    },
}

impl StreamEvent {
    /// The wire `type` tag for this event.
    #[must_use]
    pub const fn wire_type(&self) -> &'static str {
        match self {
            Self::StartStep { .. } => "start-step",
            Self::FinishStep { .. } => "finish-step",
            Self::ReasoningStart => "reasoning-start",
            Self::ReasoningDelta { .. } => "reasoning-delta",
            Self::ReasoningEnd => "reasoning-end",
            Self::TextDelta { .. } => "text-delta",
            Self::ToolCall { .. } => "tool-call",
            Self::ToolResult(_) => "tool-result",
            Self::ToolError { .. } => "tool-error",
            Self::Data(part) => match part {
                DataPart::FileContent { .. } => "data-file-content",
                DataPart::ShellOutput { .. } => "data-shell-output",
                DataPart::SearchResult { .. } => "data-search-result",
                DataPart::ToolProgress { .. } => "data-tool-progress",
                DataPart::ReasoningStep { .. } => "data-reasoning-step",
                DataPart::SubAgentStream { .. } => "data-sub-agent-stream",
                DataPart::MemoryResult { .. } => "data-memory-result",
            },
            Self::Finish { .. } => "finish",
            Self::Error { .. } => "error",
        }
    }

    /// Check whether this is the terminal event of a run.
    #[must_use]
    pub const fn is_finish(&self) -> bool {
        matches!(self, Self::Finish { .. })
    }

    fn wire_fields(&self) -> Value {
        match self {
            Self::StartStep { step } => serde_json::json!({ "step": step }),
            Self::FinishStep {
                step,
                finish_reason,
                usage,
            } => serde_json::json!({
                "step": step,
                "finishReason": finish_reason.as_str(),
                "usage": usage,
            }),
            Self::ReasoningStart | Self::ReasoningEnd => serde_json::json!({}),
            Self::ReasoningDelta { delta } | Self::TextDelta { delta } => {
                serde_json::json!({ "delta": delta })
            }
            Self::ToolCall {
                call_id,
                tool_name,
                input,
            } => serde_json::json!({
                "callId": call_id,
                "toolName": tool_name,
                "input": input,
            }),
            Self::ToolResult(update) => {
                let mut fields = serde_json::json!({
                    "callId": update.call_id,
                    "toolName": update.tool_name,
                    "state": update.state.as_str(),
                });
                let map = fields.as_object_mut().expect("object literal");
                if let Some(output) = &update.output {
                    map.insert("output".into(), Value::String(output.clone()));
                }
                if let Some(error_text) = &update.error_text {
                    map.insert("errorText".into(), Value::String(error_text.clone()));
                }
                if let Some(approval) = &update.approval {
                    map.insert(
                        "approval".into(),
                        serde_json::to_value(approval).unwrap_or(Value::Null),
                    );
                }
                fields
            }
            Self::ToolError {
                call_id,
                tool_name,
                error,
            } => serde_json::json!({
                "callId": call_id,
                "toolName": tool_name,
                "error": error,
            }),
            Self::Data(part) => {
                let mut value = serde_json::to_value(part).unwrap_or(Value::Null);
                if let Some(map) = value.as_object_mut() {
                    map.remove("subtype");
                }
                value
            }
            Self::Finish { reason, cancelled } => {
                let mut fields = serde_json::json!({ "reason": reason.as_str() });
                if *cancelled {
                    fields
                        .as_object_mut()
                        .expect("object literal")
                        .insert("cancelled".into(), Value::Bool(true));
                }
                fields
            }
            Self::Error { message } => serde_json::json!({ "message": message }),
        }
    }
}

impl Serialize for StreamEvent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let fields = self.wire_fields();
        let object = fields.as_object().cloned().unwrap_or_default();
        let mut map = serializer.serialize_map(Some(object.len() + 1))?;
        map.serialize_entry("type", self.wire_type())?;
        for (key, value) in &object {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Producer half of the bus.
///
/// Cloneable so tool handlers can emit data parts while the driver emits
/// loop events. Emitting on a closed bus is a no-op; the run does not
/// fail because its observer went away.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    /// Emit an event, awaiting channel capacity if the consumer is slow.
    pub async fn emit(&self, event: StreamEvent) {
        let _ = self.tx.send(event).await;
    }

    /// Emit a transient data part.
    pub async fn emit_data(&self, part: DataPart) {
        self.emit(StreamEvent::Data(part)).await;
    }

    /// Check whether the consumer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pin_project_lite::pin_project! {
    /// Consumer half of the bus.
    #[derive(Debug)]
    pub struct EventStream {
        rx: mpsc::Receiver<StreamEvent>,
    }
}

impl EventStream {
    /// Receive the next event, or `None` once the producer is done.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().rx.poll_recv(cx)
    }
}

/// Create a connected sink/stream pair with the given capacity.
#[must_use]
pub fn event_bus(capacity: usize) -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSink { tx }, EventStream { rx })
}
