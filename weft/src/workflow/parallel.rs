//! Concurrent fan-out with synthesis.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};

use super::{BoxedStep, StepInput, StepOutput, WorkflowStep};

/// Combines fan-out outputs into the final step output.
pub type Synthesize = Box<dyn Fn(Vec<String>) -> StepOutput + Send + Sync>;

/// Steps executed concurrently over the same input.
///
/// Every step receives the initial prompt. Per-step failures do not
/// abort the fan-out: the failed slot is recorded as the placeholder
/// `"[Step k failed: message]"` and passed to the synthesize function
/// with the rest.
pub struct Parallel {
    name: String,
    steps: Vec<BoxedStep>,
    synthesize: Synthesize,
}

impl std::fmt::Debug for Parallel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parallel")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .finish_non_exhaustive()
    }
}

impl Parallel {
    /// Start building a parallel fan-out.
    #[must_use]
    pub fn builder() -> ParallelBuilder {
        ParallelBuilder::default()
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the fan-out has no steps (never true once built).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[async_trait]
impl WorkflowStep for Parallel {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn execute(&self, input: StepInput) -> Result<StepOutput> {
        debug!(parallel = %self.name, steps = self.steps.len(), "Parallel fan-out");

        let runs = self
            .steps
            .iter()
            .map(|step| step.execute(StepInput::new(input.prompt.clone())));
        let settled = futures::future::join_all(runs).await;

        let outputs: Vec<String> = settled
            .into_iter()
            .enumerate()
            .map(|(k, result)| match result {
                Ok(output) => output.text,
                Err(e) => format!("[Step {k} failed: {e}]"),
            })
            .collect();

        Ok((self.synthesize)(outputs))
    }
}

/// Builder for [`Parallel`].
#[derive(Default)]
pub struct ParallelBuilder {
    name: Option<String>,
    steps: Vec<BoxedStep>,
    synthesize: Option<Synthesize>,
}

impl ParallelBuilder {
    /// Name the fan-out.
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

    /// Set the synthesis function.
    #[must_use]
    pub fn synthesize(
        mut self,
        synthesize: impl Fn(Vec<String>) -> StepOutput + Send + Sync + 'static,
    ) -> Self {
        self.synthesize = Some(Box::new(synthesize));
        self
    }

    /// Build the fan-out. Without a custom synthesize function, outputs
    /// are joined with blank lines.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when no steps were added.
    pub fn build(self) -> Result<Parallel> {
        if self.steps.is_empty() {
            return Err(Error::configuration("parallel requires at least one step"));
        }
        Ok(Parallel {
            name: self.name.unwrap_or_else(|| "parallel".to_owned()),
            steps: self.steps,
            synthesize: self
                .synthesize
                .unwrap_or_else(|| Box::new(|outputs| StepOutput::text(outputs.join("\n\n")))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{EchoStep, FailingStep};
    use super::*;

    #[tokio::test]
    async fn all_steps_receive_the_same_input() {
        let parallel = Parallel::builder()
            .step(EchoStep { tag: "a" })
            .step(EchoStep { tag: "b" })
            .build()
            .unwrap();

        let output = parallel.execute(StepInput::new("x")).await.unwrap();
        assert_eq!(output.text, "a(x)\n\nb(x)");
    }

    #[tokio::test]
    async fn failures_become_placeholders_for_synthesis() {
        let parallel = Parallel::builder()
            .step(EchoStep { tag: "ok" })
            .step(FailingStep)
            .synthesize(|outputs| {
                StepOutput::text(outputs.join(" | "))
                    .with_metadata(serde_json::json!({"count": outputs.len()}))
            })
            .build()
            .unwrap();

        let output = parallel.execute(StepInput::new("x")).await.unwrap();
        assert!(output.text.contains("ok(x)"));
        assert!(output.text.contains("[Step 1 failed:"));
        assert_eq!(output.metadata.unwrap()["count"], 2);
    }

    #[test]
    fn empty_parallel_is_rejected_at_construction() {
        let err = Parallel::builder().build().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn parallel_nests_inside_pipeline() {
        let fan_out = Parallel::builder()
            .step(EchoStep { tag: "l" })
            .step(EchoStep { tag: "r" })
            .build()
            .unwrap();
        let pipeline = super::super::Pipeline::builder()
            .step(fan_out)
            .step(EchoStep { tag: "merge" })
            .build()
            .unwrap();

        let output = pipeline.execute(StepInput::new("x")).await.unwrap();
        assert_eq!(output.text, "merge(l(x)\n\nr(x))");
    }
}
