//! Assertion vocabulary over run results.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::agent::RunResult;
use crate::error::{Error, Result};

/// Outcome of one assertion check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionResult {
    /// Assertion name.
    pub name: String,
    /// Whether it held.
    pub passed: bool,
    /// Failure explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

type CustomCheck = Arc<dyn Fn(&RunResult) -> bool + Send + Sync>;

enum Check {
    ToolCalled(String),
    NoToolCalled(String),
    ToolCalledTimes(String, usize),
    OutputMatches(Regex),
    OutputContains(String),
    StepCount { min: usize, max: Option<usize> },
    TokenUsage(u64),
    Custom(CustomCheck),
}

/// A named boolean check over a [`RunResult`].
pub struct Assertion {
    name: String,
    check: Check,
}

impl Assertion {
    /// Holds when the named tool was called at least once.
    #[must_use]
    pub fn tool_called(tool: impl Into<String>) -> Self {
        let tool = tool.into();
        Self {
            name: format!("toolCalled({tool})"),
            check: Check::ToolCalled(tool),
        }
    }

    /// Holds when the named tool was never called.
    #[must_use]
    pub fn no_tool_called(tool: impl Into<String>) -> Self {
        let tool = tool.into();
        Self {
            name: format!("noToolCalled({tool})"),
            check: Check::NoToolCalled(tool),
        }
    }

    /// Holds when the named tool was called exactly `times` times.
    #[must_use]
    pub fn tool_called_times(tool: impl Into<String>, times: usize) -> Self {
        let tool = tool.into();
        Self {
            name: format!("toolCalledTimes({tool}, {times})"),
            check: Check::ToolCalledTimes(tool, times),
        }
    }

    /// Holds when the output matches the regex.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for an invalid pattern.
    pub fn output_matches(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::configuration(format!("invalid assertion pattern: {e}")))?;
        Ok(Self {
            name: format!("outputMatches({pattern})"),
            check: Check::OutputMatches(regex),
        })
    }

    /// Holds when the output contains the substring.
    #[must_use]
    pub fn output_contains(needle: impl Into<String>) -> Self {
        let needle = needle.into();
        Self {
            name: format!("outputContains({needle})"),
            check: Check::OutputContains(needle),
        }
    }

    /// Holds when the step count is within `[min, max]`.
    #[must_use]
    pub fn step_count(min: usize, max: Option<usize>) -> Self {
        let name = match max {
            Some(max) => format!("stepCount({min}, {max})"),
            None => format!("stepCount({min})"),
        };
        Self {
            name,
            check: Check::StepCount { min, max },
        }
    }

    /// Holds when total token usage does not exceed `max_total`.
    #[must_use]
    pub fn token_usage(max_total: u64) -> Self {
        Self {
            name: format!("tokenUsage({max_total})"),
            check: Check::TokenUsage(max_total),
        }
    }

    /// A named custom predicate.
    #[must_use]
    pub fn custom(
        name: impl Into<String>,
        check: impl Fn(&RunResult) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            check: Check::Custom(Arc::new(check)),
        }
    }

    /// The assertion name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate against a run result.
    #[must_use]
    pub fn evaluate(&self, result: &RunResult) -> AssertionResult {
        let (passed, message) = match &self.check {
            Check::ToolCalled(tool) => (
                result.tool_called(tool),
                format!("expected at least one call to '{tool}'"),
            ),
            Check::NoToolCalled(tool) => (
                !result.tool_called(tool),
                format!(
                    "expected no calls to '{tool}', saw {}",
                    result.tool_call_count(tool)
                ),
            ),
            Check::ToolCalledTimes(tool, times) => {
                let actual = result.tool_call_count(tool);
                (
                    actual == *times,
                    format!("expected {times} call(s) to '{tool}', saw {actual}"),
                )
            }
            Check::OutputMatches(regex) => (
                regex.is_match(&result.text),
                format!("output does not match /{}/", regex.as_str()),
            ),
            Check::OutputContains(needle) => (
                result.text.contains(needle),
                format!("output does not contain '{needle}'"),
            ),
            Check::StepCount { min, max } => {
                let steps = result.step_count();
                let ok = steps >= *min && max.is_none_or(|max| steps <= max);
                (ok, format!("step count {steps} outside expected range"))
            }
            Check::TokenUsage(max_total) => {
                let total = result.total_usage.total_tokens;
                (
                    total <= *max_total,
                    format!("total tokens {total} exceed {max_total}"),
                )
            }
            Check::Custom(check) => (check(result), "custom check failed".to_owned()),
        };

        AssertionResult {
            name: self.name.clone(),
            passed,
            message: (!passed).then_some(message),
        }
    }
}

impl fmt::Debug for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assertion").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::provider::FinishReason;
    use crate::usage::Usage;

    use super::*;

    fn result_with(text: &str) -> RunResult {
        RunResult {
            text: text.to_owned(),
            steps: Vec::new(),
            total_usage: Usage::new(100, 50),
            finish_reason: FinishReason::Stop,
            cancelled: false,
        }
    }

    #[test]
    fn output_assertions() {
        let result = result_with("The answer is 42.");

        assert!(Assertion::output_contains("42").evaluate(&result).passed);
        assert!(!Assertion::output_contains("43").evaluate(&result).passed);

        let matches = Assertion::output_matches(r"answer is \d+").unwrap();
        assert!(matches.evaluate(&result).passed);

        assert!(Assertion::output_matches("[").is_err());
    }

    #[test]
    fn usage_and_step_assertions() {
        let result = result_with("x");

        assert!(Assertion::token_usage(150).evaluate(&result).passed);
        assert!(!Assertion::token_usage(149).evaluate(&result).passed);

        assert!(Assertion::step_count(0, None).evaluate(&result).passed);
        let failed = Assertion::step_count(1, Some(3)).evaluate(&result);
        assert!(!failed.passed);
        assert!(failed.message.unwrap().contains("step count 0"));
    }

    #[test]
    fn tool_assertions_count_calls() {
        use crate::agent::StepRecord;
        use crate::message::ToolCallRequest;

        let mut result = result_with("done");
        result.steps.push(StepRecord {
            step: 1,
            text: String::new(),
            reasoning: None,
            tool_calls: vec![
                ToolCallRequest::new("c1", "shell", serde_json::json!({})),
                ToolCallRequest::new("c2", "shell", serde_json::json!({})),
            ],
            tool_results: Vec::new(),
            usage: None,
            finish_reason: FinishReason::ToolCalls,
        });

        assert!(Assertion::tool_called("shell").evaluate(&result).passed);
        assert!(Assertion::tool_called_times("shell", 2).evaluate(&result).passed);
        assert!(!Assertion::tool_called_times("shell", 1).evaluate(&result).passed);
        assert!(Assertion::no_tool_called("browser").evaluate(&result).passed);
    }

    #[test]
    fn custom_assertions_run_the_predicate() {
        let result = result_with("short");
        let assertion = Assertion::custom("short output", |r| r.text.len() < 10);
        let outcome = assertion.evaluate(&result);
        assert!(outcome.passed);
        assert_eq!(outcome.name, "short output");
    }
}
