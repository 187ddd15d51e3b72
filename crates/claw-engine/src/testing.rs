//! Tools for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use claw_core::ids::ToolCallId;
use claw_core::tools::{
    ConfirmationDetails, Tool, ToolArguments, ToolCategory, ToolError, ToolInvocation,
};

/// Returns its `text` argument, or the argument object as JSON.
pub struct EchoTool {
    name: String,
    category: ToolCategory,
    details: Option<ConfirmationDetails>,
}

impl EchoTool {
    pub fn new(name: &str, category: ToolCategory) -> Self {
        Self {
            name: name.to_string(),
            category,
            details: None,
        }
    }

    pub fn with_details(mut self, title: &str, prompt: &str) -> Self {
        self.details = Some(ConfirmationDetails {
            title: title.into(),
            prompt: prompt.into(),
        });
        self
    }
}

impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Echo arguments back"
    }
    fn category(&self) -> ToolCategory {
        self.category
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"text": {"type": "string"}}})
    }
    fn build(&self, call_id: ToolCallId, arguments: ToolArguments) -> Result<Box<dyn ToolInvocation>, ToolError> {
        Ok(Box::new(EchoInvocation {
            call_id,
            arguments,
            details: self.details.clone(),
        }))
    }
}

struct EchoInvocation {
    call_id: ToolCallId,
    arguments: ToolArguments,
    details: Option<ConfirmationDetails>,
}

#[async_trait]
impl ToolInvocation for EchoInvocation {
    fn call_id(&self) -> &ToolCallId {
        &self.call_id
    }

    fn confirmation_details(&self) -> Option<ConfirmationDetails> {
        self.details.clone()
    }

    fn affected_locations(&self) -> Vec<String> {
        self.arguments
            .get("path")
            .and_then(|v| v.as_str())
            .map(|p| vec![p.to_string()])
            .unwrap_or_default()
    }

    async fn execute(&self, _cancel: CancellationToken) -> Result<String, ToolError> {
        Ok(match self.arguments.get("text").and_then(|v| v.as_str()) {
            Some(text) => text.to_string(),
            None => Value::Object(self.arguments.clone()).to_string(),
        })
    }
}

/// Sleeps, tracking how many invocations run at once and the order they
/// finish in.
pub struct SleepTool {
    name: String,
    delay: Duration,
    pub in_flight: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub finished: Arc<Mutex<Vec<String>>>,
}

impl SleepTool {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Share counters with another sleeper.
    pub fn sharing(name: &str, delay: Duration, other: &SleepTool) -> Self {
        Self {
            name: name.to_string(),
            delay,
            in_flight: Arc::clone(&other.in_flight),
            peak: Arc::clone(&other.peak),
            finished: Arc::clone(&other.finished),
        }
    }
}

impl Tool for SleepTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Sleep for a while"
    }
    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    fn build(&self, call_id: ToolCallId, _arguments: ToolArguments) -> Result<Box<dyn ToolInvocation>, ToolError> {
        Ok(Box::new(SleepInvocation {
            call_id,
            name: self.name.clone(),
            delay: self.delay,
            in_flight: Arc::clone(&self.in_flight),
            peak: Arc::clone(&self.peak),
            finished: Arc::clone(&self.finished),
        }))
    }
}

struct SleepInvocation {
    call_id: ToolCallId,
    name: String,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    finished: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ToolInvocation for SleepInvocation {
    fn call_id(&self) -> &ToolCallId {
        &self.call_id
    }

    async fn execute(&self, cancel: CancellationToken) -> Result<String, ToolError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let outcome = tokio::select! {
            () = tokio::time::sleep(self.delay) => Ok(format!("{} done", self.name)),
            () = cancel.cancelled() => Err(ToolError::Cancelled),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.finished.lock().push(self.name.clone());
        outcome
    }
}

/// Fails at build time or at execution time.
pub struct FailTool {
    name: String,
    at_build: bool,
}

impl FailTool {
    pub fn at_build(name: &str) -> Self {
        Self {
            name: name.to_string(),
            at_build: true,
        }
    }

    pub fn at_execute(name: &str) -> Self {
        Self {
            name: name.to_string(),
            at_build: false,
        }
    }
}

impl Tool for FailTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn category(&self) -> ToolCategory {
        ToolCategory::Other
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "required": ["path"]})
    }
    fn build(&self, call_id: ToolCallId, _arguments: ToolArguments) -> Result<Box<dyn ToolInvocation>, ToolError> {
        if self.at_build {
            return Err(ToolError::InvalidArguments("missing path".into()));
        }
        Ok(Box::new(FailInvocation { call_id }))
    }
}

struct FailInvocation {
    call_id: ToolCallId,
}

#[async_trait]
impl ToolInvocation for FailInvocation {
    fn call_id(&self) -> &ToolCallId {
        &self.call_id
    }

    async fn execute(&self, _cancel: CancellationToken) -> Result<String, ToolError> {
        Err(ToolError::ExecutionFailed("boom".into()))
    }
}

pub struct PanicTool;

impl Tool for PanicTool {
    fn name(&self) -> &str {
        "panic"
    }
    fn description(&self) -> &str {
        "Panics when run"
    }
    fn category(&self) -> ToolCategory {
        ToolCategory::Other
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    fn build(&self, call_id: ToolCallId, _arguments: ToolArguments) -> Result<Box<dyn ToolInvocation>, ToolError> {
        Ok(Box::new(PanicInvocation { call_id }))
    }
}

struct PanicInvocation {
    call_id: ToolCallId,
}

#[async_trait]
impl ToolInvocation for PanicInvocation {
    fn call_id(&self) -> &ToolCallId {
        &self.call_id
    }

    async fn execute(&self, _cancel: CancellationToken) -> Result<String, ToolError> {
        panic!("tool exploded");
    }
}

/// Emits `len` bytes of `x`.
pub struct BigOutputTool {
    pub len: usize,
}

impl Tool for BigOutputTool {
    fn name(&self) -> &str {
        "big"
    }
    fn description(&self) -> &str {
        "Produces a large output"
    }
    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    fn build(&self, call_id: ToolCallId, _arguments: ToolArguments) -> Result<Box<dyn ToolInvocation>, ToolError> {
        Ok(Box::new(BigOutputInvocation {
            call_id,
            len: self.len,
        }))
    }
}

struct BigOutputInvocation {
    call_id: ToolCallId,
    len: usize,
}

#[async_trait]
impl ToolInvocation for BigOutputInvocation {
    fn call_id(&self) -> &ToolCallId {
        &self.call_id
    }

    async fn execute(&self, _cancel: CancellationToken) -> Result<String, ToolError> {
        Ok("x".repeat(self.len))
    }
}
