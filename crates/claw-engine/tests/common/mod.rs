#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use claw_core::events::{AgentEvent, EventPayload, LoopState};
use claw_core::ids::ToolCallId;
use claw_core::model::ModelClient;
use claw_core::tools::{Tool, ToolArguments, ToolCategory, ToolError, ToolInvocation, ToolResult};
use claw_engine::{AgentConfig, Orchestrator, ToolRegistry};

/// Tool that returns its `text` argument and counts executions.
pub struct NoteTool {
    name: String,
    category: ToolCategory,
    pub executed: Arc<AtomicUsize>,
}

impl NoteTool {
    pub fn new(name: &str, category: ToolCategory) -> Self {
        Self {
            name: name.to_string(),
            category,
            executed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn executions(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }
}

impl Tool for NoteTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Returns its text argument"
    }
    fn category(&self) -> ToolCategory {
        self.category
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"text": {"type": "string"}, "path": {"type": "string"}}})
    }
    fn build(&self, call_id: ToolCallId, arguments: ToolArguments) -> Result<Box<dyn ToolInvocation>, ToolError> {
        Ok(Box::new(NoteInvocation {
            call_id,
            text: arguments
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or("done")
                .to_string(),
            executed: Arc::clone(&self.executed),
        }))
    }
}

struct NoteInvocation {
    call_id: ToolCallId,
    text: String,
    executed: Arc<AtomicUsize>,
}

#[async_trait]
impl ToolInvocation for NoteInvocation {
    fn call_id(&self) -> &ToolCallId {
        &self.call_id
    }

    async fn execute(&self, _cancel: CancellationToken) -> Result<String, ToolError> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }
}

/// Read tool that sleeps and records peak concurrency across its clones.
#[derive(Clone)]
pub struct SlowTool {
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

impl SlowTool {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }
    fn description(&self) -> &str {
        "Sleeps"
    }
    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    fn build(&self, call_id: ToolCallId, _arguments: ToolArguments) -> Result<Box<dyn ToolInvocation>, ToolError> {
        Ok(Box::new(SlowInvocation {
            call_id,
            tool: self.clone(),
        }))
    }
}

struct SlowInvocation {
    call_id: ToolCallId,
    tool: SlowTool,
}

#[async_trait]
impl ToolInvocation for SlowInvocation {
    fn call_id(&self) -> &ToolCallId {
        &self.call_id
    }

    async fn execute(&self, _cancel: CancellationToken) -> Result<String, ToolError> {
        let now = self.tool.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.tool.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.tool.delay).await;
        self.tool.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok("slept".into())
    }
}

/// Read tool named "block" that runs until its cancellation token fires.
#[derive(Clone, Default)]
pub struct BlockerTool {
    pub started: Arc<Notify>,
    pub saw_cancel: Arc<AtomicBool>,
}

impl Tool for BlockerTool {
    fn name(&self) -> &str {
        "block"
    }
    fn description(&self) -> &str {
        "Blocks until cancelled"
    }
    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    fn build(&self, call_id: ToolCallId, _arguments: ToolArguments) -> Result<Box<dyn ToolInvocation>, ToolError> {
        Ok(Box::new(BlockerInvocation {
            call_id,
            tool: self.clone(),
        }))
    }
}

struct BlockerInvocation {
    call_id: ToolCallId,
    tool: BlockerTool,
}

#[async_trait]
impl ToolInvocation for BlockerInvocation {
    fn call_id(&self) -> &ToolCallId {
        &self.call_id
    }

    async fn execute(&self, cancel: CancellationToken) -> Result<String, ToolError> {
        self.tool.started.notify_one();
        tokio::select! {
            () = cancel.cancelled() => {
                self.tool.saw_cancel.store(true, Ordering::SeqCst);
                Err(ToolError::Cancelled)
            }
            () = tokio::time::sleep(Duration::from_secs(3600)) => Ok("finished".into()),
        }
    }
}

pub fn orchestrator(model: Arc<dyn ModelClient>, tools: Vec<Arc<dyn Tool>>, config: AgentConfig) -> Arc<Orchestrator> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    Arc::new(Orchestrator::new(model, Arc::new(registry), config))
}

pub async fn collect(stream: UnboundedReceiverStream<AgentEvent>) -> Vec<AgentEvent> {
    stream.collect().await
}

pub fn tool_results(events: &[AgentEvent]) -> Vec<ToolResult> {
    events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::ToolResult { result } => Some(result.clone()),
            _ => None,
        })
        .collect()
}

pub fn states(events: &[AgentEvent]) -> Vec<LoopState> {
    events
        .iter()
        .filter_map(|e| match e.payload {
            EventPayload::StateChanged { state } => Some(state),
            _ => None,
        })
        .collect()
}

pub fn completed_turns(events: &[AgentEvent]) -> Option<u32> {
    events.iter().find_map(|e| match e.payload {
        EventPayload::Completed { turns } => Some(turns),
        _ => None,
    })
}

pub fn errors(events: &[AgentEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::Error { message } => Some(message.clone()),
            _ => None,
        })
        .collect()
}
