#![cfg_attr(docsrs, feature(doc_cfg))]
//! Weft is an agent execution core: it drives a language model through a
//! bounded tool-calling loop, streams intermediate progress to callers,
//! enforces safety and resource limits on tool effects, and composes
//! agents into pipelines, parallel fan-outs, and coordinated teams.
//!
//! The layers, leaves first: provider interface → tool contract, stream
//! bus, usage limits → tool implementations, approval gate → the
//! tool-loop driver → workflows and the eval runner → teams. Lower
//! layers know nothing about upper ones.

// Core contracts
pub mod error;
pub mod message;
pub mod provider;
pub mod stream;
pub mod usage;

// Tools and their safety rails
pub mod approval;
pub mod sandbox;
pub mod tool;
pub mod tools;

// The driver
pub mod agent;

// Composition and evaluation
pub mod eval;
pub mod team;
pub mod workflow;

pub mod prelude;

// Re-export the working set at the crate root
pub use agent::{Agent, AgentBuilder, RunResult, StepRecord};
pub use error::{Error, ProviderError, Result, ToolError};
pub use provider::{FinishReason, ModelProvider, StepDelta};
pub use stream::{DataPart, EventStream, StreamEvent};
pub use tool::{Tool, ToolBox, ToolDefinition};
pub use usage::{Usage, UsageLimits};
