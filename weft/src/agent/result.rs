//! Run result types and the event collector.
//!
//! A [`RunResult`] is an aggregate view over a run's stream: per-step
//! records, additive usage totals, and the terminal finish reason.
//! [`RunCollector`] folds a run's events back into that aggregate, which
//! is how `generate` is built on top of `stream`.

use serde::{Deserialize, Serialize};

use crate::message::ToolCallRequest;
use crate::provider::FinishReason;
use crate::stream::StreamEvent;
use crate::tool::ToolResultUpdate;
use crate::usage::Usage;

/// One completed step of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// One-based step index.
    pub step: u32,
    /// Text produced during the step.
    pub text: String,
    /// Reasoning produced during the step, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Tool results produced for those calls.
    pub tool_results: Vec<ToolResultUpdate>,
    /// Usage reported for the step; `None` counts as zero.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Why the step's model turn ended.
    pub finish_reason: FinishReason,
}

/// Aggregate result of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Final answer text (the last step's text).
    pub text: String,
    /// All completed steps in order.
    pub steps: Vec<StepRecord>,
    /// Sum of per-step usage.
    pub total_usage: Usage,
    /// Terminal reason for the run.
    pub finish_reason: FinishReason,
    /// Whether the run was cancelled by the caller.
    #[serde(default)]
    pub cancelled: bool,
}

impl RunResult {
    /// Number of completed steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Whether a tool with the given name was called during the run.
    #[must_use]
    pub fn tool_called(&self, name: &str) -> bool {
        self.tool_call_count(name) > 0
    }

    /// How many times a tool with the given name was called.
    #[must_use]
    pub fn tool_call_count(&self, name: &str) -> usize {
        self.steps
            .iter()
            .flat_map(|s| &s.tool_calls)
            .filter(|c| c.tool_name == name)
            .count()
    }
}

/// Folds a run's [`StreamEvent`]s into a [`RunResult`].
#[derive(Debug, Default)]
pub struct RunCollector {
    steps: Vec<StepRecord>,
    current: Option<StepRecord>,
    total_usage: Usage,
    finish_reason: Option<FinishReason>,
    cancelled: bool,
}

impl RunCollector {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event.
    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::StartStep { step } => {
                self.current = Some(StepRecord {
                    step: *step,
                    text: String::new(),
                    reasoning: None,
                    tool_calls: Vec::new(),
                    tool_results: Vec::new(),
                    usage: None,
                    finish_reason: FinishReason::Stop,
                });
            }
            StreamEvent::TextDelta { delta } => {
                if let Some(current) = &mut self.current {
                    current.text.push_str(delta);
                }
            }
            StreamEvent::ReasoningDelta { delta } => {
                if let Some(current) = &mut self.current {
                    current.reasoning.get_or_insert_default().push_str(delta);
                }
            }
            StreamEvent::ToolCall {
                call_id,
                tool_name,
                input,
            } => {
                if let Some(current) = &mut self.current {
                    current.tool_calls.push(ToolCallRequest::new(
                        call_id.clone(),
                        tool_name.clone(),
                        input.clone(),
                    ));
                }
            }
            StreamEvent::ToolResult(update) => {
                if let Some(current) = &mut self.current {
                    current.tool_results.push(update.clone());
                }
            }
            StreamEvent::FinishStep {
                step: _,
                finish_reason,
                usage,
            } => {
                if let Some(mut current) = self.current.take() {
                    current.finish_reason = *finish_reason;
                    current.usage = *usage;
                    self.total_usage += usage.unwrap_or_else(Usage::zero);
                    self.steps.push(current);
                }
            }
            StreamEvent::Finish { reason, cancelled } => {
                self.finish_reason = Some(*reason);
                self.cancelled = *cancelled;
            }
            StreamEvent::ReasoningStart
            | StreamEvent::ReasoningEnd
            | StreamEvent::ToolError { .. }
            | StreamEvent::Data(_)
            | StreamEvent::Error { .. } => {}
        }
    }

    /// Consume the collector into the aggregate result.
    #[must_use]
    pub fn finish(self) -> RunResult {
        let text = self
            .steps
            .last()
            .map(|s| s.text.clone())
            .unwrap_or_default();
        RunResult {
            text,
            steps: self.steps,
            total_usage: self.total_usage,
            finish_reason: self.finish_reason.unwrap_or(FinishReason::Error),
            cancelled: self.cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_a_two_step_run() {
        let mut collector = RunCollector::new();
        let events = [
            StreamEvent::StartStep { step: 1 },
            StreamEvent::ToolCall {
                call_id: "c1".into(),
                tool_name: "shell".into(),
                input: serde_json::json!({"command": "ls"}),
            },
            StreamEvent::ToolResult(ToolResultUpdate::output(
                "c1",
                "shell",
                r#"{"success":true}"#.into(),
            )),
            StreamEvent::FinishStep {
                step: 1,
                finish_reason: FinishReason::ToolCalls,
                usage: Some(Usage::new(100, 20)),
            },
            StreamEvent::StartStep { step: 2 },
            StreamEvent::TextDelta {
                delta: "All done".into(),
            },
            StreamEvent::FinishStep {
                step: 2,
                finish_reason: FinishReason::Stop,
                usage: Some(Usage::new(150, 30)),
            },
            StreamEvent::Finish {
                reason: FinishReason::Stop,
                cancelled: false,
            },
        ];
        for event in &events {
            collector.apply(event);
        }

        let result = collector.finish();
        assert_eq!(result.text, "All done");
        assert_eq!(result.step_count(), 2);
        assert_eq!(result.total_usage, Usage::new(250, 50));
        assert_eq!(result.finish_reason, FinishReason::Stop);
        assert!(result.tool_called("shell"));
        assert_eq!(result.tool_call_count("shell"), 1);
        assert!(!result.tool_called("browser"));
    }

    #[test]
    fn missing_usage_counts_zero() {
        let mut collector = RunCollector::new();
        collector.apply(&StreamEvent::StartStep { step: 1 });
        collector.apply(&StreamEvent::FinishStep {
            step: 1,
            finish_reason: FinishReason::Stop,
            usage: None,
        });
        collector.apply(&StreamEvent::Finish {
            reason: FinishReason::Stop,
            cancelled: false,
        });

        let result = collector.finish();
        assert!(result.total_usage.is_zero());
        assert_eq!(result.step_count(), 1);
    }

    #[test]
    fn cancelled_finish_is_recorded() {
        let mut collector = RunCollector::new();
        collector.apply(&StreamEvent::Finish {
            reason: FinishReason::Error,
            cancelled: true,
        });

        let result = collector.finish();
        assert!(result.cancelled);
        assert_eq!(result.finish_reason, FinishReason::Error);
        assert!(result.text.is_empty());
    }

    #[test]
    fn reasoning_deltas_accumulate() {
        let mut collector = RunCollector::new();
        collector.apply(&StreamEvent::StartStep { step: 1 });
        collector.apply(&StreamEvent::ReasoningDelta {
            delta: "think ".into(),
        });
        collector.apply(&StreamEvent::ReasoningDelta {
            delta: "harder".into(),
        });
        collector.apply(&StreamEvent::FinishStep {
            step: 1,
            finish_reason: FinishReason::Stop,
            usage: None,
        });

        let result = collector.finish();
        assert_eq!(result.steps[0].reasoning.as_deref(), Some("think harder"));
    }
}
