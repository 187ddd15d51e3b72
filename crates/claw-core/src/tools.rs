use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::ids::ToolCallId;

/// Argument mapping attached to a tool call.
pub type ToolArguments = serde_json::Map<String, Value>;

/// Closed set of tool categories. Policy decisions key off these, never off
/// concrete tool types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Read,
    Edit,
    Delete,
    Move,
    Search,
    Execute,
    Think,
    Fetch,
    Communicate,
    Skill,
    Other,
}

impl ToolCategory {
    /// Categories that change the environment.
    pub const MUTATING: [ToolCategory; 4] = [
        ToolCategory::Edit,
        ToolCategory::Delete,
        ToolCategory::Move,
        ToolCategory::Execute,
    ];

    pub fn is_mutating(self) -> bool {
        Self::MUTATING.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Edit => "edit",
            Self::Delete => "delete",
            Self::Move => "move",
            Self::Search => "search",
            Self::Execute => "execute",
            Self::Think => "think",
            Self::Fetch => "fetch",
            Self::Communicate => "communicate",
            Self::Skill => "skill",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool call requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: ToolCallId,
    pub name: String,
    #[serde(default)]
    pub arguments: ToolArguments,
}

impl ToolCallRequest {
    pub fn new(id: ToolCallId, name: impl Into<String>, arguments: ToolArguments) -> Self {
        Self {
            id,
            name: name.into(),
            arguments,
        }
    }
}

/// Outcome of one tool call. Exactly one exists per request the model issued.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: ToolCallId,
    pub success: bool,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(call_id: ToolCallId, content: impl Into<String>) -> Self {
        Self {
            call_id,
            success: true,
            content: content.into(),
            error: None,
        }
    }

    pub fn failure(call_id: ToolCallId, error: impl Into<String>) -> Self {
        Self {
            call_id,
            success: false,
            content: String::new(),
            error: Some(error.into()),
        }
    }

    /// Text fed back to the model for this result.
    pub fn model_text(&self) -> String {
        if self.success {
            self.content.clone()
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("unknown error"))
        }
    }
}

/// Tool descriptor sent to the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub parameters_schema: Value,
}

/// Confirmation text a tool renders for itself when it knows better than the
/// generic prompt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationDetails {
    pub title: String,
    pub prompt: String,
}

/// A capability with a declared schema. Builds one invocation per call.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn category(&self) -> ToolCategory;
    fn parameters_schema(&self) -> Value;

    /// Validate arguments and bind them to `call_id`.
    fn build(
        &self,
        call_id: ToolCallId,
        arguments: ToolArguments,
    ) -> Result<Box<dyn ToolInvocation>, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            category: self.category(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

/// A tool call bound to its arguments, ready to run.
///
/// `execute` must observe `cancel`: invocations that spawn processes kill them
/// when the token fires.
#[async_trait]
pub trait ToolInvocation: Send + Sync {
    fn call_id(&self) -> &ToolCallId;

    fn confirmation_details(&self) -> Option<ConfirmationDetails> {
        None
    }

    /// Paths or resources the call would touch.
    fn affected_locations(&self) -> Vec<String> {
        Vec::new()
    }

    async fn execute(&self, cancel: CancellationToken) -> Result<String, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
    #[error("tool '{0}' not found")]
    NotFound(String),
}
