//! Deep-reasoning tool.
//!
//! Lets the model externalize a chain of thoughts with optional revisions
//! and branches. The engine keeps a bounded rolling history per tool
//! instance (one per agent), so concurrent agents never share state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::ToolError;
use crate::stream::DataPart;
use crate::tool::{Durability, Tool, ToolContext};

/// Maximum retained thoughts; older entries roll off.
const HISTORY_CAP: usize = 50;

/// Arguments for one reasoning step.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThoughtArgs {
    /// The thought content.
    pub thought: String,
    /// Position of this thought, starting at 1.
    pub thought_number: u32,
    /// Current estimate of total thoughts needed.
    pub total_thoughts: u32,
    /// Whether another thought is expected.
    pub next_thought_needed: bool,
    /// Whether this thought revises an earlier one.
    #[serde(default)]
    pub is_revision: Option<bool>,
    /// The thought number being revised.
    #[serde(default)]
    pub revises_thought: Option<u32>,
    /// Thought number this branch forks from.
    #[serde(default)]
    pub branch_from_thought: Option<u32>,
    /// Identifier of the branch this thought extends.
    #[serde(default)]
    pub branch_id: Option<String>,
}

/// Result payload of a reasoning step.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThoughtOutput {
    /// Always present per the payload convention.
    pub success: bool,
    /// Echo of the thought number.
    pub thought_number: u32,
    /// Total thoughts, raised to `thought_number` when exceeded.
    pub total_thoughts: u32,
    /// Echo of whether another thought is expected.
    pub next_thought_needed: bool,
    /// Names of branches seen so far.
    pub branches: Vec<String>,
    /// Number of retained thoughts.
    pub history_length: usize,
}

#[derive(Debug, Default)]
struct ReasoningState {
    history: Vec<ThoughtArgs>,
    branches: Vec<String>,
}

/// The deep-reasoning tool.
#[derive(Debug, Default)]
pub struct ReasoningTool {
    state: Mutex<ReasoningState>,
}

impl ReasoningTool {
    /// Create a fresh engine with empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Tool for ReasoningTool {
    const NAME: &'static str = "deep_reasoning";
    type Args = ThoughtArgs;
    type Output = ThoughtOutput;
    type Error = ToolError;

    fn description(&self) -> String {
        "Work through a problem step by step. Supports revising earlier \
         thoughts and exploring branches."
            .to_owned()
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "thought": {"type": "string", "minLength": 1},
                "thoughtNumber": {"type": "integer", "minimum": 1},
                "totalThoughts": {"type": "integer", "minimum": 1},
                "nextThoughtNeeded": {"type": "boolean"},
                "isRevision": {"type": "boolean"},
                "revisesThought": {"type": "integer", "minimum": 1},
                "branchFromThought": {"type": "integer", "minimum": 1},
                "branchId": {"type": "string"}
            },
            "required": ["thought", "thoughtNumber", "totalThoughts", "nextThoughtNeeded"]
        })
    }

    fn durability(&self) -> Durability {
        Durability::default().independent()
    }

    async fn call(&self, args: Self::Args, ctx: &ToolContext) -> Result<Self::Output, Self::Error> {
        // The model may discover it needs more thoughts than it predicted.
        let total_thoughts = args.total_thoughts.max(args.thought_number);

        let mut recorded = args.clone();
        recorded.total_thoughts = total_thoughts;

        let (branches, history_length) = {
            let mut state = self.state.lock().await;
            if let Some(branch_id) = &recorded.branch_id
                && !state.branches.contains(branch_id)
            {
                state.branches.push(branch_id.clone());
            }
            state.history.push(recorded.clone());
            if state.history.len() > HISTORY_CAP {
                let overflow = state.history.len() - HISTORY_CAP;
                state.history.drain(..overflow);
            }
            (state.branches.clone(), state.history.len())
        };

        ctx.emit_data(DataPart::ReasoningStep {
            thought: recorded.thought,
            thought_number: recorded.thought_number,
            total_thoughts,
            branch_id: recorded.branch_id,
        })
        .await;

        Ok(ThoughtOutput {
            success: true,
            thought_number: args.thought_number,
            total_thoughts,
            next_thought_needed: args.next_thought_needed,
            branches,
            history_length,
        })
    }
}
