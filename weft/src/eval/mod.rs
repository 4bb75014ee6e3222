//! The eval runner.
//!
//! Runs a suite of prompt cases against one agent with bounded
//! concurrency and a per-case timeout, evaluates assertions over each
//! run result, and reports per-case and aggregate outcomes.

mod assertions;
mod reporter;

pub use assertions::{Assertion, AssertionResult};
pub use reporter::{ConsoleReporter, JsonReporter, NullReporter, Reporter};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::agent::Agent;
use crate::error::{Error, Result};

/// Default per-case timeout.
pub const DEFAULT_CASE_TIMEOUT: Duration = Duration::from_secs(30);

/// One eval case.
#[derive(Debug)]
pub struct EvalCase {
    /// Case name.
    pub name: String,
    /// Prompt for the agent.
    pub prompt: String,
    /// Checks over the run result; the case passes iff all pass.
    pub assertions: Vec<Assertion>,
    /// Budget for the whole run.
    pub timeout: Duration,
}

impl EvalCase {
    /// Create a case with the default timeout.
    #[must_use]
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            assertions: Vec::new(),
            timeout: DEFAULT_CASE_TIMEOUT,
        }
    }

    /// Add an assertion.
    #[must_use]
    pub fn assert(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    /// Override the per-case timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Result of one case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    /// Case name.
    pub name: String,
    /// Whether every assertion passed (and no timeout occurred).
    pub passed: bool,
    /// Wall-clock duration in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    /// Per-assertion outcomes.
    pub assertions: Vec<AssertionResult>,
    /// Timeout or infrastructure error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of a suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    /// Suite name.
    pub suite: String,
    /// Total cases.
    pub total: usize,
    /// Cases that passed.
    pub passed: usize,
    /// Cases that failed.
    pub failed: usize,
    /// Wall-clock duration in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    /// Per-case results in declaration order.
    pub cases: Vec<CaseResult>,
}

/// Bounded-concurrency case runner.
pub struct EvalRunner {
    name: String,
    agent: Agent,
    cases: Vec<EvalCase>,
    max_concurrency: usize,
    reporter: Box<dyn Reporter>,
}

impl EvalRunner {
    /// Start building a runner.
    #[must_use]
    pub fn builder() -> EvalRunnerBuilder {
        EvalRunnerBuilder::default()
    }

    /// Run every case and return the aggregate result.
    pub async fn run(&self) -> SuiteResult {
        info!(suite = %self.name, cases = self.cases.len(), "Eval suite started");
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency.max(1)));

        let runs = self.cases.iter().map(|case| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let result = Self::run_case(&self.agent, case).await;
                self.reporter.case_finished(&result);
                result
            }
        });
        let cases: Vec<CaseResult> = futures::future::join_all(runs).await;

        let passed = cases.iter().filter(|c| c.passed).count();
        let suite = SuiteResult {
            suite: self.name.clone(),
            total: cases.len(),
            passed,
            failed: cases.len() - passed,
            duration_ms: started.elapsed().as_millis() as u64,
            cases,
        };
        self.reporter.suite_finished(&suite);
        info!(suite = %self.name, passed = suite.passed, failed = suite.failed, "Eval suite finished");
        suite
    }

    async fn run_case(agent: &Agent, case: &EvalCase) -> CaseResult {
        debug!(case = %case.name, "Running eval case");
        let started = Instant::now();

        let outcome = tokio::time::timeout(case.timeout, agent.generate(&case.prompt)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(run) => {
                let assertions: Vec<AssertionResult> = case
                    .assertions
                    .iter()
                    .map(|assertion| assertion.evaluate(&run))
                    .collect();
                let passed = assertions.iter().all(|a| a.passed);
                CaseResult {
                    name: case.name.clone(),
                    passed,
                    duration_ms,
                    assertions,
                    error: None,
                }
            }
            Err(_) => CaseResult {
                name: case.name.clone(),
                passed: false,
                duration_ms,
                assertions: Vec::new(),
                error: Some(format!("timed out after {} ms", case.timeout.as_millis())),
            },
        }
    }
}

impl std::fmt::Debug for EvalRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalRunner")
            .field("name", &self.name)
            .field("cases", &self.cases.len())
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

/// Builder for [`EvalRunner`].
#[derive(Default)]
pub struct EvalRunnerBuilder {
    name: Option<String>,
    agent: Option<Agent>,
    cases: Vec<EvalCase>,
    max_concurrency: Option<usize>,
    reporter: Option<Box<dyn Reporter>>,
}

impl EvalRunnerBuilder {
    /// Name the suite.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the agent under test.
    #[must_use]
    pub fn agent(mut self, agent: Agent) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Add a case.
    #[must_use]
    pub fn case(mut self, case: EvalCase) -> Self {
        self.cases.push(case);
        self
    }

    /// Bound concurrent cases (default 1).
    #[must_use]
    pub const fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    /// Set the reporter (default console).
    #[must_use]
    pub fn reporter(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporter = Some(Box::new(reporter));
        self
    }

    /// Build the runner.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] without an agent or with no cases.
    pub fn build(self) -> Result<EvalRunner> {
        let agent = self
            .agent
            .ok_or_else(|| Error::configuration("eval runner requires an agent"))?;
        if self.cases.is_empty() {
            return Err(Error::configuration("eval runner requires at least one case"));
        }
        Ok(EvalRunner {
            name: self.name.unwrap_or_else(|| "eval".to_owned()),
            agent,
            cases: self.cases,
            max_concurrency: self.max_concurrency.unwrap_or(1),
            reporter: self
                .reporter
                .unwrap_or_else(|| Box::new(ConsoleReporter)),
        })
    }
}
