//! Convenience re-exports for the common working set.
//!
//! ```rust,ignore
//! use weft::prelude::*;
//! ```

pub use crate::agent::{Agent, AgentBuilder, AgentConfig, RunCollector, RunResult, StepRecord};
pub use crate::approval::{
    ApprovalConfig, ApprovalHandler, ApprovalRequest, ApproveAll, DenyAll, TimeoutAction,
};
pub use crate::error::{Error, ProviderError, Result, ToolError, ToolResult};
pub use crate::eval::{
    Assertion, AssertionResult, ConsoleReporter, EvalCase, EvalRunner, JsonReporter, Reporter,
    SuiteResult,
};
pub use crate::message::{Message, Role, ToolCallRequest};
pub use crate::provider::mock::{MockProvider, MockTurn};
pub use crate::provider::{FinishReason, ModelProvider, StepDelta, StepOptions};
pub use crate::sandbox::PathSandbox;
pub use crate::stream::{DataPart, EventSink, EventStream, StreamEvent};
pub use crate::team::{Task, TaskBoard, Team, TeamMessage, TeamPhase, TeamSnapshot};
pub use crate::tool::{
    BoxedTool, Durability, DynTool, Tool, ToolBox, ToolContext, ToolDefinition, ToolResultState,
    ToolResultUpdate,
};
pub use crate::tools::ToolPreset;
pub use crate::usage::{Usage, UsageLimits};
pub use crate::workflow::{Parallel, Pipeline, StepInput, StepOutput, WorkflowStep};
