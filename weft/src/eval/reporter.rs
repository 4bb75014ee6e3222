//! Eval reporters.
//!
//! Reporters are the one place the crate writes to standard output:
//! producing a report is their contract.

use super::{CaseResult, SuiteResult};

/// Observer of eval progress and results.
pub trait Reporter: Send + Sync {
    /// Called as each case finishes.
    fn case_finished(&self, _case: &CaseResult) {}

    /// Called once with the aggregate result.
    fn suite_finished(&self, _suite: &SuiteResult) {}
}

/// Human-readable line-per-case output.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    #[allow(clippy::print_stdout)]
    fn case_finished(&self, case: &CaseResult) {
        let mark = if case.passed { "PASS" } else { "FAIL" };
        println!("[{mark}] {} ({} ms)", case.name, case.duration_ms);
        if let Some(error) = &case.error {
            println!("       {error}");
        }
        for assertion in case.assertions.iter().filter(|a| !a.passed) {
            println!(
                "       {}: {}",
                assertion.name,
                assertion.message.as_deref().unwrap_or("failed")
            );
        }
    }

    #[allow(clippy::print_stdout)]
    fn suite_finished(&self, suite: &SuiteResult) {
        println!(
            "{}: {}/{} passed in {} ms",
            suite.suite, suite.passed, suite.total, suite.duration_ms
        );
    }
}

/// Writes one JSON document for the whole suite at the end.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReporter;

impl Reporter for JsonReporter {
    #[allow(clippy::print_stdout)]
    fn suite_finished(&self, suite: &SuiteResult) {
        if let Ok(document) = serde_json::to_string_pretty(suite) {
            println!("{document}");
        }
    }
}

/// Discards everything; useful in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {}
