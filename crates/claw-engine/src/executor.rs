use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use claw_core::tools::{ToolCallRequest, ToolCategory, ToolError, ToolInvocation, ToolResult};
use claw_telemetry::MetricsRecorder;

use crate::registry::ToolRegistry;
use crate::truncate::truncate_output;

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 256 * 1024;

/// A call whose tool exists and whose arguments were accepted.
pub struct PreparedCall {
    pub call: ToolCallRequest,
    pub category: ToolCategory,
    pub invocation: Box<dyn ToolInvocation>,
}

/// Runs single tool calls. Every outcome, including panics and timeouts,
/// becomes a [`ToolResult`]; nothing here returns an error to the caller.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    max_output_bytes: usize,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            timeout: DEFAULT_TOOL_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            metrics: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve the tool and bind arguments. The error side is the failed
    /// result to report.
    pub fn prepare(&self, call: &ToolCallRequest) -> Result<PreparedCall, ToolResult> {
        let Some(tool) = self.registry.get(&call.name) else {
            warn!(tool = %call.name, call_id = %call.id, "unknown tool requested");
            self.record(&call.name, "not_found", None);
            return Err(ToolResult::failure(
                call.id.clone(),
                format!("Tool '{}' not found", call.name),
            ));
        };

        match tool.build(call.id.clone(), call.arguments.clone()) {
            Ok(invocation) => Ok(PreparedCall {
                call: call.clone(),
                category: tool.category(),
                invocation,
            }),
            Err(e) => {
                debug!(tool = %call.name, error = %e, "tool rejected arguments");
                self.record(&call.name, "invalid_arguments", None);
                Err(ToolResult::failure(call.id.clone(), e.to_string()))
            }
        }
    }

    /// Run a prepared call under the timeout. A panic in the tool is caught
    /// and reported as a failure.
    #[instrument(skip_all, fields(tool = %prepared.call.name, call_id = %prepared.call.id))]
    pub async fn run(&self, prepared: PreparedCall, cancel: &CancellationToken) -> ToolResult {
        let PreparedCall { call, invocation, .. } = prepared;
        let call_id = call.id.clone();

        if cancel.is_cancelled() {
            return ToolResult::failure(call_id, ToolError::Cancelled.to_string());
        }

        let child = cancel.child_token();
        let start = Instant::now();
        let outcome = tokio::time::timeout(
            self.timeout,
            AssertUnwindSafe(invocation.execute(child.clone())).catch_unwind(),
        )
        .await;
        let elapsed = start.elapsed();

        let (result, label) = match outcome {
            Ok(Ok(Ok(output))) => (
                ToolResult::ok(call_id, truncate_output(output, self.max_output_bytes)),
                "success",
            ),
            Ok(Ok(Err(e))) => {
                debug!(error = %e, "tool failed");
                (ToolResult::failure(call_id, e.to_string()), "error")
            }
            Ok(Err(panic)) => {
                let msg = panic_message(&panic);
                error!(panic = %msg, "tool panicked during execution");
                (
                    ToolResult::failure(call_id, format!("Internal error: tool crashed ({msg})")),
                    "panic",
                )
            }
            Err(_) => {
                child.cancel();
                warn!(timeout_ms = self.timeout.as_millis() as u64, "tool timed out");
                (
                    ToolResult::failure(call_id, ToolError::Timeout(self.timeout).to_string()),
                    "timeout",
                )
            }
        };

        self.record(&call.name, label, Some(elapsed));
        result
    }

    /// Prepare and run in one step.
    pub async fn execute(&self, call: &ToolCallRequest, cancel: &CancellationToken) -> ToolResult {
        match self.prepare(call) {
            Ok(prepared) => self.run(prepared, cancel).await,
            Err(failed) => failed,
        }
    }

    fn record(&self, tool: &str, outcome: &str, elapsed: Option<Duration>) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        metrics.counter_inc("tool_calls_total", &[("tool", tool), ("outcome", outcome)], 1);
        if let Some(elapsed) = elapsed {
            metrics.histogram_observe(
                "tool_duration_ms",
                &[("tool", tool)],
                elapsed.as_secs_f64() * 1000.0,
            );
        }
    }
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
