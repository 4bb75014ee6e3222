//! Sequential pipeline.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};

use super::{BoxedStep, StepInput, StepOutput, WorkflowStep};

/// Maps a step's output to the next step's prompt.
pub type Transform = Box<dyn Fn(&StepOutput, usize) -> String + Send + Sync>;

/// Steps executed strictly in order.
///
/// Step 0 receives the initial prompt; step *k* receives the transform
/// of step *k−1*'s output, or its plain text when no transform is set.
/// The first failing step surfaces its error; no rollback is attempted.
pub struct Pipeline {
    name: String,
    steps: Vec<BoxedStep>,
    transform: Option<Transform>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Start building a pipeline.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the pipeline has no steps (never true for built pipelines).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[async_trait]
impl WorkflowStep for Pipeline {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn execute(&self, input: StepInput) -> Result<StepOutput> {
        let mut prompt = input.prompt;
        let mut last = StepOutput::text("");

        for (index, step) in self.steps.iter().enumerate() {
            debug!(pipeline = %self.name, step = index, name = %step.name(), "Pipeline step");
            last = step.execute(StepInput::new(prompt)).await.map_err(|e| {
                Error::Workflow(format!(
                    "pipeline '{}' step {} ({}) failed: {e}",
                    self.name,
                    index,
                    step.name()
                ))
            })?;

            prompt = match &self.transform {
                Some(transform) => transform(&last, index + 1),
                None => last.text.clone(),
            };
        }

        Ok(last)
    }
}

/// Builder for [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    name: Option<String>,
    steps: Vec<BoxedStep>,
    transform: Option<Transform>,
}

impl PipelineBuilder {
    /// Name the pipeline.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Append a step.
    #[must_use]
    pub fn step(mut self, step: impl WorkflowStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Append a boxed step.
    #[must_use]
    pub fn step_boxed(mut self, step: BoxedStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Set the inter-step prompt transform. The second argument is the
    /// index of the step about to receive the prompt.
    #[must_use]
    pub fn transform(
        mut self,
        transform: impl Fn(&StepOutput, usize) -> String + Send + Sync + 'static,
    ) -> Self {
        self.transform = Some(Box::new(transform));
        self
    }

    /// Build the pipeline.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when no steps were added.
    pub fn build(self) -> Result<Pipeline> {
        if self.steps.is_empty() {
            return Err(Error::configuration("pipeline requires at least one step"));
        }
        Ok(Pipeline {
            name: self.name.unwrap_or_else(|| "pipeline".to_owned()),
            steps: self.steps,
            transform: self.transform,
        })
    }
}
