use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ToolCallId;
use crate::messages::Role;
use crate::tools::{ToolArguments, ToolCallRequest, ToolResult};

/// Turn loop state. Waiting for a confirmation is a suspension point inside
/// `Running`, not a state of its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Running,
    Completed,
    Error,
}

/// A pending human approval for one tool call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub call_id: ToolCallId,
    pub title: String,
    pub prompt: String,
    pub tool_name: String,
    pub arguments: ToolArguments,
}

/// Events emitted by the orchestrator. The only observable output of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Message { role: Role, content: String },
    ToolCallIssued { calls: Vec<ToolCallRequest> },
    ToolResult { result: ToolResult },
    ConfirmationRequested { request: ConfirmationRequest },
    StateChanged { state: LoopState },
    Error { message: String },
    Completed { turns: u32 },
    Thinking { message: String },
}

/// Payload discriminant, used for subscription filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    ToolCallIssued,
    ToolResult,
    ConfirmationRequested,
    StateChanged,
    Error,
    Completed,
    Thinking,
}

impl AgentEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn message(role: Role, content: impl Into<String>) -> Self {
        Self::new(EventPayload::Message {
            role,
            content: content.into(),
        })
    }

    pub fn thinking(message: impl Into<String>) -> Self {
        Self::new(EventPayload::Thinking {
            message: message.into(),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventPayload::Error {
            message: message.into(),
        })
    }

    pub fn state_changed(state: LoopState) -> Self {
        Self::new(EventPayload::StateChanged { state })
    }

    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::Message { .. } => EventKind::Message,
            EventPayload::ToolCallIssued { .. } => EventKind::ToolCallIssued,
            EventPayload::ToolResult { .. } => EventKind::ToolResult,
            EventPayload::ConfirmationRequested { .. } => EventKind::ConfirmationRequested,
            EventPayload::StateChanged { .. } => EventKind::StateChanged,
            EventPayload::Error { .. } => EventKind::Error,
            EventPayload::Completed { .. } => EventKind::Completed,
            EventPayload::Thinking { .. } => EventKind::Thinking,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self.kind() {
            EventKind::Message => "message",
            EventKind::ToolCallIssued => "tool_call_issued",
            EventKind::ToolResult => "tool_result",
            EventKind::ConfirmationRequested => "confirmation_requested",
            EventKind::StateChanged => "state_changed",
            EventKind::Error => "error",
            EventKind::Completed => "completed",
            EventKind::Thinking => "thinking",
        }
    }
}
