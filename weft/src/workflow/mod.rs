//! Workflow composition.
//!
//! A [`WorkflowStep`] is anything that turns a prompt into text with
//! optional metadata. Agents are steps; [`Pipeline`] and [`Parallel`]
//! are steps too, so workflows compose recursively — a pipeline stage
//! can itself be a parallel fan-out of agents.

mod parallel;
mod pipeline;

pub use parallel::{Parallel, ParallelBuilder};
pub use pipeline::{Pipeline, PipelineBuilder};

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::Agent;
use crate::error::{Error, Result};
use crate::provider::FinishReason;

/// Input to one workflow step.
#[derive(Debug, Clone)]
pub struct StepInput {
    /// The prompt for this step.
    pub prompt: String,
}

impl StepInput {
    /// Create a step input from a prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

/// Output of one workflow step.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// The produced text.
    pub text: String,
    /// Step-specific metadata (agent id, usage, sub-results).
    pub metadata: Option<Value>,
}

impl StepOutput {
    /// Create a plain text output.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: None,
        }
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// One composable unit of work.
#[async_trait]
pub trait WorkflowStep: Send + Sync {
    /// A short name for error messages and tracing.
    fn name(&self) -> String {
        "step".to_owned()
    }

    /// Execute the step.
    ///
    /// # Errors
    ///
    /// Step-specific; pipelines fail fast on the first error.
    async fn execute(&self, input: StepInput) -> Result<StepOutput>;
}

/// A boxed workflow step.
pub type BoxedStep = Box<dyn WorkflowStep>;

/// Agents adapt to the step contract directly: `execute` runs
/// `generate` and projects the run into `{text, metadata}`.
#[async_trait]
impl WorkflowStep for Agent {
    fn name(&self) -> String {
        self.agent_id().to_owned()
    }

    async fn execute(&self, input: StepInput) -> Result<StepOutput> {
        let result = self.generate(input.prompt).await;

        if result.cancelled {
            return Err(Error::Cancelled);
        }
        if result.finish_reason == FinishReason::Error {
            return Err(Error::Workflow(format!(
                "agent '{}' run ended with an error",
                self.agent_id()
            )));
        }

        let metadata = serde_json::json!({
            "agentId": self.agent_id(),
            "role": self.role(),
            "steps": result.step_count(),
            "usage": result.total_usage,
        });
        Ok(StepOutput {
            text: result.text,
            metadata: Some(metadata),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A step returning a fixed transformation of its input.
    pub(crate) struct EchoStep {
        pub(crate) tag: &'static str,
    }

    #[async_trait]
    impl WorkflowStep for EchoStep {
        fn name(&self) -> String {
            self.tag.to_owned()
        }

        async fn execute(&self, input: StepInput) -> Result<StepOutput> {
            Ok(StepOutput::text(format!("{}({})", self.tag, input.prompt)))
        }
    }

    /// A step that always fails.
    pub(crate) struct FailingStep;

    #[async_trait]
    impl WorkflowStep for FailingStep {
        fn name(&self) -> String {
            "failing".to_owned()
        }

        async fn execute(&self, _input: StepInput) -> Result<StepOutput> {
            Err(Error::Workflow("deliberate failure".to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockProvider;

    #[tokio::test]
    async fn agent_adapts_to_the_step_contract() {
        let dir = assert_fs::TempDir::new().unwrap();
        let agent = Agent::builder()
            .provider(MockProvider::always("adapted"))
            .workspace_root(dir.path())
            .agent_id("step-agent")
            .role("writer")
            .build()
            .unwrap();

        let output = agent.execute(StepInput::new("hello")).await.unwrap();
        assert_eq!(output.text, "adapted");

        let metadata = output.metadata.unwrap();
        assert_eq!(metadata["agentId"], "step-agent");
        assert_eq!(metadata["role"], "writer");
        assert_eq!(metadata["steps"], 1);
    }

    #[tokio::test]
    async fn failed_agent_run_surfaces_as_step_error() {
        let dir = assert_fs::TempDir::new().unwrap();
        let agent = Agent::builder()
            .provider(MockProvider::failing(
                crate::error::ProviderError::Unavailable("down".into()),
            ))
            .workspace_root(dir.path())
            .build()
            .unwrap();

        let err = agent.execute(StepInput::new("x")).await.unwrap_err();
        assert!(matches!(err, Error::Workflow(_)));
    }
}
