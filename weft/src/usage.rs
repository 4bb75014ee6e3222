//! Token usage tracking and run-level usage limits.
//!
//! [`Usage`] is the additive counter aggregated over steps; a step with no
//! reported usage contributes zero. [`UsageLimits`] is the guard the
//! driver consults after each finished step: the first violated limit (in
//! declaration order) raises a [`UsageExceeded`] signal, which the driver
//! converts into a `finish(reason = "length")` termination.

use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Token usage statistics from model steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the input/prompt.
    #[serde(default)]
    pub input_tokens: u64,

    /// Number of tokens in the output/completion.
    #[serde(default)]
    pub output_tokens: u64,

    /// Total tokens used (input + output).
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    /// Create a new usage record.
    #[must_use]
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Create an empty usage record.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
        }
    }

    /// Check if no tokens have been recorded.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.total_tokens == 0 && self.input_tokens == 0 && self.output_tokens == 0
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "in={} out={} total={}",
            self.input_tokens, self.output_tokens, self.total_tokens
        )
    }
}

/// Which limit a [`UsageExceeded`] signal refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LimitKind {
    /// Cap on the number of model steps.
    MaxRequests,
    /// Cap on aggregate input tokens.
    MaxInputTokens,
    /// Cap on aggregate output tokens.
    MaxOutputTokens,
    /// Cap on aggregate total tokens.
    MaxTotalTokens,
}

impl LimitKind {
    /// Get the configuration key name for this limit.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MaxRequests => "maxRequests",
            Self::MaxInputTokens => "maxInputTokens",
            Self::MaxOutputTokens => "maxOutputTokens",
            Self::MaxTotalTokens => "maxTotalTokens",
        }
    }
}

/// Aggregate counters at the moment a limit tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Number of model steps observed so far.
    pub requests: u64,
    /// Aggregate token usage so far.
    pub usage: Usage,
}

/// Typed signal raised when a usage limit is exceeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageExceeded {
    /// The limit that tripped.
    pub limit_type: LimitKind,
    /// The configured threshold.
    pub limit_value: u64,
    /// The aggregate value that exceeded it.
    pub current_value: u64,
    /// Full counters at the time of the violation.
    pub snapshot: UsageSnapshot,
}

impl fmt::Display for UsageExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "usage limit exceeded: {} = {} (limit {})",
            self.limit_type.as_str(),
            self.current_value,
            self.limit_value
        )
    }
}

/// Run-level usage limits.
///
/// All fields are optional; an empty configuration never stops a run.
/// Limits are checked in declaration order and the first violation wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageLimits {
    /// Maximum number of model steps.
    pub max_requests: Option<u64>,
    /// Maximum aggregate input tokens.
    pub max_input_tokens: Option<u64>,
    /// Maximum aggregate output tokens.
    pub max_output_tokens: Option<u64>,
    /// Maximum aggregate total tokens.
    pub max_total_tokens: Option<u64>,
}

impl UsageLimits {
    /// Create an empty (never-tripping) configuration.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_requests: None,
            max_input_tokens: None,
            max_output_tokens: None,
            max_total_tokens: None,
        }
    }

    /// Set the maximum number of model steps.
    #[must_use]
    pub const fn with_max_requests(mut self, value: u64) -> Self {
        self.max_requests = Some(value);
        self
    }

    /// Set the maximum aggregate input tokens.
    #[must_use]
    pub const fn with_max_input_tokens(mut self, value: u64) -> Self {
        self.max_input_tokens = Some(value);
        self
    }

    /// Set the maximum aggregate output tokens.
    #[must_use]
    pub const fn with_max_output_tokens(mut self, value: u64) -> Self {
        self.max_output_tokens = Some(value);
        self
    }

    /// Set the maximum aggregate total tokens.
    #[must_use]
    pub const fn with_max_total_tokens(mut self, value: u64) -> Self {
        self.max_total_tokens = Some(value);
        self
    }

    /// Check whether no limits are configured.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.max_requests.is_none()
            && self.max_input_tokens.is_none()
            && self.max_output_tokens.is_none()
            && self.max_total_tokens.is_none()
    }

    /// Evaluate the guard after a finished step.
    ///
    /// `requests` is the step count including the just-finished step;
    /// `usage` is the aggregate over all observed steps. `maxRequests`
    /// trips once the step count reaches the limit (the just-finished
    /// step counts against it); token limits trip only when the
    /// aggregate exceeds theirs.
    ///
    /// # Errors
    ///
    /// Returns the first violated limit in declaration order:
    /// requests, input tokens, output tokens, total tokens.
    pub fn check(&self, requests: u64, usage: Usage) -> Result<(), UsageExceeded> {
        let snapshot = UsageSnapshot { requests, usage };

        if let Some(limit_value) = self.max_requests
            && requests >= limit_value
        {
            return Err(UsageExceeded {
                limit_type: LimitKind::MaxRequests,
                limit_value,
                current_value: requests,
                snapshot,
            });
        }

        let checks = [
            (LimitKind::MaxInputTokens, self.max_input_tokens, usage.input_tokens),
            (LimitKind::MaxOutputTokens, self.max_output_tokens, usage.output_tokens),
            (LimitKind::MaxTotalTokens, self.max_total_tokens, usage.total_tokens),
        ];

        for (limit_type, limit, current_value) in checks {
            if let Some(limit_value) = limit
                && current_value > limit_value
            {
                return Err(UsageExceeded {
                    limit_type,
                    limit_value,
                    current_value,
                    snapshot,
                });
            }
        }

        Ok(())
    }
}
