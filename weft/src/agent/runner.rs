//! The tool-loop driver.
//!
//! Drives a run through its steps: model turn, tool dispatch, history
//! append, limit check, terminate or loop. All progress is emitted on
//! the run's event bus; `generate` is a fold over the same events.
//!
//! Ordering guarantees within a run:
//! - text deltas of step *i* are emitted before its tool calls,
//! - every tool result of step *i* is emitted before `finish-step(i)`,
//! - `start-step(i+1)` follows `finish-step(i)` strictly.
//!
//! Tool-calls from one step run concurrently only when every involved
//! tool is marked `independent` and none requires approval; otherwise
//! dispatch is sequential in production order.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::approval::{ApprovalConfig, ApprovalRequest, resolve_approval};
use crate::error::ToolError;
use crate::message::{Message, ToolCallRequest};
use crate::provider::{
    CompletedTurn, DeltaStream, FinishReason, StepAggregator, StepDelta, StepOptions,
};
use crate::stream::{EventSink, StreamEvent};
use crate::tool::{ToolContext, ToolResultUpdate, validate_input};
use crate::usage::Usage;

use super::AgentInner;

/// Cap on tool output appended to conversation history.
const HISTORY_OUTPUT_CAP: usize = 16 * 1024;

/// Stateless engine driving one run to completion.
pub(crate) struct Runner;

impl Runner {
    /// Drive a run, emitting every event on `sink`.
    ///
    /// Always emits a terminal `finish` event, on every path.
    pub(crate) async fn run(
        inner: Arc<AgentInner>,
        prompt: String,
        sink: EventSink,
        cancel: CancellationToken,
    ) {
        let span = info_span!(
            "run",
            agent.id = %inner.config.agent_id,
            agent.role = %inner.config.role,
            run.steps = tracing::field::Empty,
            error = tracing::field::Empty,
        );
        Self::run_inner(inner, prompt, sink, cancel)
            .instrument(span)
            .await;
    }

    async fn run_inner(
        inner: Arc<AgentInner>,
        prompt: String,
        sink: EventSink,
        cancel: CancellationToken,
    ) {
        let config = &inner.config;

        let mut history = Vec::new();
        if let Some(system) = &config.system_prompt {
            history.push(Message::system(system));
        }
        history.push(Message::user(&prompt));

        // A zero step budget terminates before any step event.
        if config.max_steps == 0 {
            sink.emit(StreamEvent::Finish {
                reason: FinishReason::Length,
                cancelled: false,
            })
            .await;
            return;
        }

        let definitions = inner.toolbox.definitions();
        let options = StepOptions::default();
        let deadline = config.run_timeout.map(|t| Instant::now() + t);
        let mut total_usage = Usage::zero();

        for step in 1..=config.max_steps as u32 {
            if cancel.is_cancelled() {
                Self::finish_cancelled(&sink).await;
                return;
            }

            sink.emit(StreamEvent::StartStep { step }).await;
            debug!(step, "Starting step");

            let delta_stream = match inner.provider.step(&history, &definitions, &options).await {
                Ok(stream) => stream,
                Err(e) => {
                    Self::finish_failed(&sink, e.to_string()).await;
                    return;
                }
            };

            let turn = match Self::consume_turn(delta_stream, &sink, &cancel).await {
                Ok(Some(turn)) => turn,
                Ok(None) => {
                    Self::finish_cancelled(&sink).await;
                    return;
                }
                Err(message) => {
                    Self::finish_failed(&sink, message).await;
                    return;
                }
            };

            history.push(Message::assistant_with_calls(
                turn.text.clone(),
                turn.tool_calls.clone(),
            ));

            if !turn.tool_calls.is_empty() {
                let results =
                    Self::dispatch_calls(&inner, &turn.tool_calls, &sink, &cancel, deadline).await;
                // Tool results join history in original call order; data
                // parts never do.
                for update in &results {
                    history.push(Message::tool(
                        update.call_id.clone(),
                        history_content(update),
                    ));
                }
                if cancel.is_cancelled() {
                    Self::finish_cancelled(&sink).await;
                    return;
                }
            }

            total_usage += turn.usage.unwrap_or_else(Usage::zero);
            sink.emit(StreamEvent::FinishStep {
                step,
                finish_reason: turn.finish_reason,
                usage: turn.usage,
            })
            .await;

            if let Err(exceeded) = config.usage_limits.check(u64::from(step), total_usage) {
                warn!(limit = exceeded.limit_type.as_str(), current = exceeded.current_value, "Usage limit exceeded");
                sink.emit(StreamEvent::Finish {
                    reason: FinishReason::Length,
                    cancelled: false,
                })
                .await;
                tracing::Span::current().record("run.steps", step);
                return;
            }

            if turn.finish_reason == FinishReason::Stop || turn.tool_calls.is_empty() {
                tracing::Span::current().record("run.steps", step);
                sink.emit(StreamEvent::Finish {
                    reason: FinishReason::Stop,
                    cancelled: false,
                })
                .await;
                return;
            }
        }

        // Step budget exhausted with tool calls still pending.
        tracing::Span::current().record("run.steps", config.max_steps);
        sink.emit(StreamEvent::Finish {
            reason: FinishReason::Length,
            cancelled: false,
        })
        .await;
    }

    /// Forward a provider's deltas to the bus and assemble the turn.
    ///
    /// Returns `Ok(None)` when the run was cancelled mid-turn.
    async fn consume_turn(
        mut deltas: DeltaStream,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<Option<CompletedTurn>, String> {
        let mut aggregator = StepAggregator::new();
        let mut reasoning_open = false;

        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => return Ok(None),
                next = deltas.next() => next,
            };
            let Some(result) = next else {
                break;
            };
            let delta = result.map_err(|e| e.to_string())?;

            match &delta {
                StepDelta::Reasoning(chunk) => {
                    if !reasoning_open {
                        reasoning_open = true;
                        sink.emit(StreamEvent::ReasoningStart).await;
                    }
                    sink.emit(StreamEvent::ReasoningDelta {
                        delta: chunk.clone(),
                    })
                    .await;
                }
                StepDelta::Text(chunk) => {
                    if reasoning_open {
                        reasoning_open = false;
                        sink.emit(StreamEvent::ReasoningEnd).await;
                    }
                    sink.emit(StreamEvent::TextDelta {
                        delta: chunk.clone(),
                    })
                    .await;
                }
                StepDelta::ToolCall(call) => {
                    if reasoning_open {
                        reasoning_open = false;
                        sink.emit(StreamEvent::ReasoningEnd).await;
                    }
                    sink.emit(StreamEvent::ToolCall {
                        call_id: call.call_id.clone(),
                        tool_name: call.tool_name.clone(),
                        input: call.input.clone(),
                    })
                    .await;
                }
                StepDelta::Usage(_) | StepDelta::Finish(_) => {}
            }
            aggregator.apply(&delta);
        }

        if reasoning_open {
            sink.emit(StreamEvent::ReasoningEnd).await;
        }
        Ok(Some(aggregator.finish()))
    }

    /// Execute a step's tool calls, emitting each result.
    ///
    /// Returns the final updates in original call order.
    async fn dispatch_calls(
        inner: &Arc<AgentInner>,
        calls: &[ToolCallRequest],
        sink: &EventSink,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Vec<ToolResultUpdate> {
        let concurrent = calls.iter().all(|call| {
            inner
                .toolbox
                .get(&call.tool_name)
                .is_some_and(|tool| tool.durability().independent && !tool.needs_approval())
        });

        if concurrent {
            futures::future::join_all(
                calls
                    .iter()
                    .map(|call| Self::execute_call(inner, call, sink, cancel, deadline)),
            )
            .await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(Self::execute_call(inner, call, sink, cancel, deadline).await);
            }
            results
        }
    }

    /// Execute one call: validate, gate, run with the effective timeout
    /// and retry envelope, and emit the final result.
    async fn execute_call(
        inner: &Arc<AgentInner>,
        call: &ToolCallRequest,
        sink: &EventSink,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> ToolResultUpdate {
        let span = info_span!(
            "tool",
            tool.name = %call.tool_name,
            tool.call_id = %call.call_id,
            tool.success = tracing::field::Empty,
        );

        async {
            let update = Self::execute_call_inner(inner, call, sink, cancel, deadline).await;
            tracing::Span::current().record(
                "tool.success",
                matches!(update.state, crate::tool::ToolResultState::OutputAvailable),
            );
            sink.emit(StreamEvent::ToolResult(update.clone())).await;
            update
        }
        .instrument(span)
        .await
    }

    async fn execute_call_inner(
        inner: &Arc<AgentInner>,
        call: &ToolCallRequest,
        sink: &EventSink,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> ToolResultUpdate {
        let Some(tool) = inner.toolbox.get(&call.tool_name) else {
            warn!(tool = %call.tool_name, "Tool not found");
            return ToolResultUpdate::error(
                call.call_id.clone(),
                call.tool_name.clone(),
                ToolError::NotFound(call.tool_name.clone()).to_payload(),
            );
        };

        if let Err(e) = validate_input(&tool.definition().parameters, &call.input) {
            return ToolResultUpdate::error(
                call.call_id.clone(),
                call.tool_name.clone(),
                e.to_payload(),
            );
        }

        if tool.needs_approval() {
            sink.emit(StreamEvent::ToolResult(ToolResultUpdate::approval_requested(
                call.call_id.clone(),
                call.tool_name.clone(),
                &call.input,
            )))
            .await;

            let config = inner.approval.clone().unwrap_or_else(ApprovalConfig::default);
            let request = ApprovalRequest {
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                input: call.input.clone(),
            };
            let approved =
                resolve_approval(&config, &inner.approvals, &request, cancel).await;

            sink.emit(StreamEvent::ToolResult(ToolResultUpdate::approval_responded(
                call.call_id.clone(),
                call.tool_name.clone(),
                approved,
            )))
            .await;

            if !approved {
                return ToolResultUpdate::denied(call.call_id.clone(), call.tool_name.clone());
            }
        }

        let durability = tool.durability();
        let mut budget = durability.timeout;
        if let Some(deadline) = deadline {
            budget = budget.min(deadline.saturating_duration_since(Instant::now()));
        }

        let ctx = ToolContext::new(call.call_id.clone(), sink.clone(), cancel.child_token());

        let mut attempt: u32 = 0;
        loop {
            let outcome = tokio::select! {
                result = tokio::time::timeout(budget, tool.call_json(call.input.clone(), &ctx)) => result,
                () = cancel.cancelled() => {
                    ctx.cancel.cancel();
                    return ToolResultUpdate::error(
                        call.call_id.clone(),
                        call.tool_name.clone(),
                        ToolError::Cancelled.to_payload(),
                    );
                }
            };

            match outcome {
                Ok(Ok(payload)) => {
                    return ToolResultUpdate::output(
                        call.call_id.clone(),
                        call.tool_name.clone(),
                        payload,
                    );
                }
                Ok(Err(e)) => {
                    // Only plain execution failures are worth retrying;
                    // safety rejections are deterministic.
                    if matches!(e, ToolError::Execution(_)) && attempt < durability.retry_count {
                        attempt += 1;
                        debug!(tool = %call.tool_name, attempt, "Retrying tool call");
                        continue;
                    }
                    return ToolResultUpdate::error(
                        call.call_id.clone(),
                        call.tool_name.clone(),
                        e.to_payload(),
                    );
                }
                Err(_) => {
                    ctx.cancel.cancel();
                    return ToolResultUpdate::error(
                        call.call_id.clone(),
                        call.tool_name.clone(),
                        ToolError::Timeout(budget.as_millis() as u64).to_payload(),
                    );
                }
            }
        }
    }

    async fn finish_cancelled(sink: &EventSink) {
        sink.emit(StreamEvent::Finish {
            reason: FinishReason::Error,
            cancelled: true,
        })
        .await;
    }

    async fn finish_failed(sink: &EventSink, message: String) {
        tracing::Span::current().record("error", message.as_str());
        sink.emit(StreamEvent::Error { message }).await;
        sink.emit(StreamEvent::Finish {
            reason: FinishReason::Error,
            cancelled: false,
        })
        .await;
    }
}

/// Tool output as appended to history, capped to the tool contract.
fn history_content(update: &ToolResultUpdate) -> String {
    let raw = update
        .output
        .as_deref()
        .or(update.error_text.as_deref())
        .unwrap_or(r#"{"success":false,"error":"denied"}"#);
    if raw.len() <= HISTORY_OUTPUT_CAP {
        return raw.to_owned();
    }
    let mut end = HISTORY_OUTPUT_CAP;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… [truncated]", &raw[..end])
}
