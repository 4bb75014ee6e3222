//! Error types for the weft runtime.
//!
//! Three layers of errors exist, mirroring the layering of the runtime:
//! [`ProviderError`] for model-step failures, [`ToolError`] for tool
//! dispatch and handler failures, and [`Error`] as the crate-level
//! aggregate returned by run, workflow, team, and eval APIs.
//!
//! Handler errors never abort a run: the driver converts them to
//! `output-error` tool results so the model can observe and retry. Only
//! provider failures, cancellation, and configuration mistakes surface as
//! an [`Error`] to the caller.

use thiserror::Error;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// A type alias for `Result<T, ToolError>`.
pub type ToolResult<T> = std::result::Result<T, ToolError>;

/// Errors raised by a model provider during a single step.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProviderError {
    /// The provider could not be reached or returned a server failure.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider applied rate limiting to the request.
    #[error("provider rate limited: {0}")]
    RateLimited(String),

    /// The configured credentials were rejected.
    #[error("provider rejected credentials: {0}")]
    InvalidKey(String),

    /// The provider rejected a tool schema or request shape.
    #[error("provider rejected schema: {0}")]
    SchemaRejected(String),
}

/// Errors raised while dispatching or executing a tool.
///
/// Every variant maps to a stable kebab-case code via [`ToolError::code`],
/// which is what tool-result payloads carry on the stream.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ToolError {
    /// A path escaped the sandbox, or an approval was denied.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// A shell command matched the pre-execution blocklist.
    #[error("command blocked: {0}")]
    CommandBlocked(String),

    /// An interactive command was requested but cannot be hosted.
    #[error("interactive command not supported: {0}")]
    InteractiveNotSupported(String),

    /// Tool input failed structural schema validation.
    #[error("invalid tool input: {0}")]
    Validation(String),

    /// The handler failed or a spawned process exited abnormally.
    #[error("tool execution failed: {0}")]
    Execution(String),

    /// The handler exceeded its effective timeout.
    #[error("tool timed out after {0} ms")]
    Timeout(u64),

    /// Unknown tool, session, task, or recipient.
    #[error("not found: {0}")]
    NotFound(String),

    /// The external browser CLI is not installed.
    #[error("browser CLI not available")]
    BrowserCliMissing,

    /// The call was cancelled before the handler completed.
    #[error("tool call cancelled")]
    Cancelled,

    /// Output could not be serialized to the tool payload convention.
    #[error("tool output serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ToolError {
    /// Stable kebab-case error code carried in tool-result payloads.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AccessDenied(_) => "access-denied",
            Self::CommandBlocked(_) => "command-blocked",
            Self::InteractiveNotSupported(_) => "interactive-not-supported",
            Self::Validation(_) => "validation-failed",
            Self::Execution(_) | Self::Serialization(_) => "execution-failed",
            Self::Timeout(_) => "timeout",
            Self::NotFound(_) => "not-found",
            Self::BrowserCliMissing => "browser-cli-missing",
            Self::Cancelled => "cancelled",
        }
    }

    /// Create an execution error.
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Create a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Render the error as the conventional `{"success": false, ...}`
    /// JSON payload string.
    #[must_use]
    pub fn to_payload(&self) -> String {
        serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "code": self.code(),
        })
        .to_string()
    }
}

/// The crate-level error type for runs, workflows, teams, and evals.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A model provider failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A tool failed in a way that aborts the surrounding operation.
    ///
    /// Note: handler failures inside a run do not produce this; they are
    /// converted to `output-error` tool results. This variant is for tool
    /// infrastructure used outside the loop (e.g. team member tools).
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Invalid configuration detected at construction time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The run was cancelled by the caller.
    #[error("run cancelled")]
    Cancelled,

    /// A team round completed with tasks remaining and no forward progress.
    #[error("team stalled with {} unfinished task(s): {}", remaining.len(), remaining.join(", "))]
    TeamStalled {
        /// Ids of the tasks that could not be claimed or completed.
        remaining: Vec<String>,
    },

    /// A workflow step failed; pipelines surface this without rollback.
    #[error("workflow step failed: {0}")]
    Workflow(String),

    /// Unknown task, member, or session referenced by name.
    #[error("not found: {0}")]
    NotFound(String),

    /// JSON serialization failure on a wire shape.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Check whether this error represents caller cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
