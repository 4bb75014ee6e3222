//! Tool trait, registry, and the tool-call contract.
//!
//! A tool is a named capability with a structural input schema, a handler,
//! an optional approval requirement, and a [`Durability`] hint. Handlers
//! return values serialized to the `{"success": bool, ...}` JSON payload
//! convention; transient data parts are emitted through the
//! [`ToolContext`]'s event sink.
//!
//! Input is validated against the tool's schema *before* dispatch; a
//! schema violation never reaches the handler.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;
use crate::stream::{DataPart, EventSink};

/// Definition of a tool as presented to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique snake_case tool name.
    pub name: String,
    /// Description used for model prompting.
    pub description: String,
    /// JSON schema for the tool's input.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Returns the tool name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Advisory durability metadata on a tool.
///
/// Schedulers may use the full hint; the runtime treats `retry_count` and
/// `timeout` as the default retry/timeout envelope around the handler, and
/// `independent` as permission for concurrent dispatch within a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Durability {
    /// Whether the tool is available at all.
    pub enabled: bool,
    /// Whether calls may run concurrently with other tools' calls.
    pub independent: bool,
    /// Default number of handler retries after a failure.
    pub retry_count: u32,
    /// Default handler timeout.
    pub timeout: Duration,
}

impl Default for Durability {
    fn default() -> Self {
        Self {
            enabled: true,
            independent: false,
            retry_count: 0,
            timeout: Duration::from_secs(60),
        }
    }
}

impl Durability {
    /// Mark the tool safe for concurrent dispatch.
    #[must_use]
    pub const fn independent(mut self) -> Self {
        self.independent = true;
        self
    }

    /// Set the default handler timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the default retry count.
    #[must_use]
    pub const fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// Lifecycle state of a tool call, as carried on tool-result events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolResultState {
    /// The handler completed and output is available.
    OutputAvailable,
    /// The handler or validation failed.
    OutputError,
    /// The call was denied by the approval gate.
    OutputDenied,
    /// The call is suspended awaiting approval.
    ApprovalRequested,
    /// An approval response was recorded.
    ApprovalResponded,
    /// Input was accepted and dispatch is pending.
    InputAvailable,
}

impl ToolResultState {
    /// The kebab-case wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OutputAvailable => "output-available",
            Self::OutputError => "output-error",
            Self::OutputDenied => "output-denied",
            Self::ApprovalRequested => "approval-requested",
            Self::ApprovalResponded => "approval-responded",
            Self::InputAvailable => "input-available",
        }
    }
}

/// Approval information attached to a tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPayload {
    /// The recorded decision, if one has been made.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
}

/// A tool-result progression, as appended to history and emitted on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultUpdate {
    /// The call this result belongs to.
    pub call_id: String,
    /// Tool name.
    pub tool_name: String,
    /// Result state.
    pub state: ToolResultState,
    /// Handler output in the JSON payload convention.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Error text for `output-error` results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    /// Approval information for approval states.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalPayload>,
}

impl ToolResultUpdate {
    /// A successful result with output.
    #[must_use]
    pub fn output(call_id: impl Into<String>, tool_name: impl Into<String>, output: String) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            state: ToolResultState::OutputAvailable,
            output: Some(output),
            error_text: None,
            approval: None,
        }
    }

    /// A failed result with error text.
    #[must_use]
    pub fn error(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        error_text: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            state: ToolResultState::OutputError,
            output: None,
            error_text: Some(error_text.into()),
            approval: None,
        }
    }

    /// A denied result.
    #[must_use]
    pub fn denied(call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            state: ToolResultState::OutputDenied,
            output: None,
            error_text: None,
            approval: Some(ApprovalPayload {
                approved: Some(false),
            }),
        }
    }

    /// An approval-requested result carrying the call payload.
    #[must_use]
    pub fn approval_requested(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: &Value,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            state: ToolResultState::ApprovalRequested,
            output: Some(input.to_string()),
            error_text: None,
            approval: Some(ApprovalPayload { approved: None }),
        }
    }

    /// An approval-responded result.
    #[must_use]
    pub fn approval_responded(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        approved: bool,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            state: ToolResultState::ApprovalResponded,
            output: None,
            error_text: None,
            approval: Some(ApprovalPayload {
                approved: Some(approved),
            }),
        }
    }
}

/// Per-call context handed to tool handlers.
///
/// Carries the event sink for transient data parts and the call's
/// cancellation token. Handlers must release scoped resources on every
/// exit path, including cancellation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// The call id being executed.
    pub call_id: String,
    /// Sink for transient data parts, absent in detached contexts.
    sink: Option<EventSink>,
    /// Cancellation signal for this call.
    pub cancel: CancellationToken,
}

impl ToolContext {
    /// Create a context wired to a run's event sink.
    #[must_use]
    pub fn new(call_id: impl Into<String>, sink: EventSink, cancel: CancellationToken) -> Self {
        Self {
            call_id: call_id.into(),
            sink: Some(sink),
            cancel,
        }
    }

    /// Create a detached context with no observer, for direct invocation.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            call_id: String::new(),
            sink: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Emit a transient data part if an observer is attached.
    pub async fn emit_data(&self, part: DataPart) {
        if let Some(sink) = &self.sink {
            sink.emit_data(part).await;
        }
    }

    /// Check whether the call has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// The core trait for all tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static name of the tool.
    const NAME: &'static str;

    /// Arguments type for the tool.
    type Args: for<'de> Deserialize<'de> + Send;

    /// Output type of the tool, serialized to the payload convention.
    type Output: Serialize + Send;

    /// Error type for tool execution.
    type Error: Into<ToolError> + Send;

    /// Get the name of the tool.
    fn name(&self) -> &'static str {
        Self::NAME
    }

    /// Get the description of the tool.
    fn description(&self) -> String;

    /// Get the JSON schema for the tool's input.
    fn parameters_schema(&self) -> Value;

    /// Get the durability hint for the tool.
    fn durability(&self) -> Durability {
        Durability::default()
    }

    /// Whether calls to this tool require approval by default.
    fn needs_approval(&self) -> bool {
        false
    }

    /// Execute the tool with the given arguments.
    async fn call(&self, args: Self::Args, ctx: &ToolContext) -> Result<Self::Output, Self::Error>;

    /// Get the tool definition for model prompting.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters_schema())
    }
}

/// A boxed dynamic tool.
pub type BoxedTool = Box<dyn DynTool>;

/// Object-safe version of [`Tool`] for dynamic dispatch.
#[async_trait]
pub trait DynTool: Send + Sync {
    /// Get the name of the tool.
    fn name(&self) -> &str;

    /// Get the description of the tool.
    fn description(&self) -> String;

    /// Get the tool definition.
    fn definition(&self) -> ToolDefinition;

    /// Get the durability hint.
    fn durability(&self) -> Durability;

    /// Whether calls require approval by default.
    fn needs_approval(&self) -> bool;

    /// Call the tool with JSON arguments, returning the payload string.
    async fn call_json(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError>;
}

#[async_trait]
impl<T: Tool + 'static> DynTool for T {
    fn name(&self) -> &str {
        Tool::name(self)
    }

    fn description(&self) -> String {
        Tool::description(self)
    }

    fn definition(&self) -> ToolDefinition {
        Tool::definition(self)
    }

    fn durability(&self) -> Durability {
        Tool::durability(self)
    }

    fn needs_approval(&self) -> bool {
        Tool::needs_approval(self)
    }

    async fn call_json(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let typed_args: T::Args = serde_json::from_value(args)
            .map_err(|e| ToolError::Validation(e.to_string()))?;
        let output = self.call(typed_args, ctx).await.map_err(Into::into)?;
        serde_json::to_string(&output).map_err(ToolError::Serialization)
    }
}

/// Validate a JSON value against a structural schema.
///
/// Supports the subset tool schemas use: `type`, `required`, `properties`,
/// `items`, `enum`, `minLength`/`maxLength` for strings, and
/// `minimum`/`maximum` for numbers. Unknown keywords are ignored.
///
/// # Errors
///
/// Returns [`ToolError::Validation`] naming the offending path.
pub fn validate_input(schema: &Value, input: &Value) -> Result<(), ToolError> {
    validate_at(schema, input, "$")
}

fn validate_at(schema: &Value, input: &Value, path: &str) -> Result<(), ToolError> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema_obj.get("type").and_then(Value::as_str) {
        let matches = match expected {
            "object" => input.is_object(),
            "array" => input.is_array(),
            "string" => input.is_string(),
            "number" => input.is_number(),
            "integer" => input.is_i64() || input.is_u64(),
            "boolean" => input.is_boolean(),
            "null" => input.is_null(),
            _ => true,
        };
        if !matches {
            return Err(ToolError::Validation(format!(
                "{path}: expected {expected}"
            )));
        }
    }

    if let Some(allowed) = schema_obj.get("enum").and_then(Value::as_array)
        && !allowed.contains(input)
    {
        return Err(ToolError::Validation(format!(
            "{path}: value not in enum"
        )));
    }

    if let Some(text) = input.as_str() {
        if let Some(min) = schema_obj.get("minLength").and_then(Value::as_u64)
            && (text.chars().count() as u64) < min
        {
            return Err(ToolError::Validation(format!(
                "{path}: shorter than minLength {min}"
            )));
        }
        if let Some(max) = schema_obj.get("maxLength").and_then(Value::as_u64)
            && (text.chars().count() as u64) > max
        {
            return Err(ToolError::Validation(format!(
                "{path}: longer than maxLength {max}"
            )));
        }
    }

    if let Some(number) = input.as_f64() {
        if let Some(min) = schema_obj.get("minimum").and_then(Value::as_f64)
            && number < min
        {
            return Err(ToolError::Validation(format!(
                "{path}: below minimum {min}"
            )));
        }
        if let Some(max) = schema_obj.get("maximum").and_then(Value::as_f64)
            && number > max
        {
            return Err(ToolError::Validation(format!(
                "{path}: above maximum {max}"
            )));
        }
    }

    if let Some(object) = input.as_object() {
        if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
            for field in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(field) {
                    return Err(ToolError::Validation(format!(
                        "{path}: missing required field '{field}'"
                    )));
                }
            }
        }
        if let Some(properties) = schema_obj.get("properties").and_then(Value::as_object) {
            for (key, subschema) in properties {
                if let Some(value) = object.get(key) {
                    validate_at(subschema, value, &format!("{path}.{key}"))?;
                }
            }
        }
    }

    if let Some(items) = input.as_array()
        && let Some(item_schema) = schema_obj.get("items")
    {
        for (index, item) in items.iter().enumerate() {
            validate_at(item_schema, item, &format!("{path}[{index}]"))?;
        }
    }

    Ok(())
}

/// A collection of tools available to one agent.
///
/// Every agent receives its own toolbox; registries hand out fresh
/// instances so per-agent tool state is never shared.
#[derive(Default)]
pub struct ToolBox {
    tools: HashMap<String, BoxedTool>,
}

impl ToolBox {
    /// Create a new empty toolbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. Disabled tools (durability `enabled: false`) are skipped.
    pub fn add<T: Tool + 'static>(&mut self, tool: T) {
        self.add_boxed(Box::new(tool));
    }

    /// Add a boxed tool.
    pub fn add_boxed(&mut self, tool: BoxedTool) {
        if !tool.durability().enabled {
            return;
        }
        self.tools.insert(tool.name().to_owned(), tool);
    }

    /// Get a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BoxedTool> {
        self.tools.get(name)
    }

    /// Remove and return a tool by name.
    pub fn take(&mut self, name: &str) -> Option<BoxedTool> {
        self.tools.remove(name)
    }

    /// Get all tool definitions.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Get the names of all tools, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if the toolbox contains a tool with the given name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get the number of tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the toolbox is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate input against the named tool's schema, then dispatch.
    ///
    /// # Errors
    ///
    /// `not-found` for unknown tools, `validation-failed` before dispatch,
    /// and whatever the handler raises.
    pub async fn call(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_owned()))?;
        validate_input(&tool.definition().parameters, &args)?;
        tool.call_json(args, ctx).await
    }
}

impl fmt::Debug for ToolBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolBox")
            .field("tools", &self.names())
            .finish_non_exhaustive()
    }
}
