use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use claw_core::ids::ToolCallId;
use claw_core::tools::{ToolArguments, ToolCallRequest, ToolResult};

use crate::executor::ToolExecutor;

pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Batch runner for explicitly scheduled, already-approved tool calls.
///
/// Calls run in dependency levels: a level starts only after every call of
/// the previous level finished. Within a level calls run concurrently, at most
/// `max_concurrent` at a time. The per-turn path of the orchestrator never
/// goes through here.
pub struct ToolScheduler {
    executor: Arc<ToolExecutor>,
    gate: Arc<Semaphore>,
    max_concurrent: usize,
    scheduled: Vec<ToolCallRequest>,
    dependencies: HashMap<String, Vec<String>>,
}

impl ToolScheduler {
    pub fn new(executor: Arc<ToolExecutor>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            executor,
            gate: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            scheduled: Vec::new(),
            dependencies: HashMap::new(),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Queue a call. Returns the id its result will carry.
    pub fn add_to_schedule(&mut self, tool_name: impl Into<String>, arguments: ToolArguments) -> ToolCallId {
        let id = ToolCallId::new();
        self.scheduled
            .push(ToolCallRequest::new(id.clone(), tool_name, arguments));
        id
    }

    /// Declare that `tool_name` must run after every tool in `depends_on`.
    pub fn add_dependency<I, S>(&mut self, tool_name: impl Into<String>, depends_on: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let deps = self.dependencies.entry(tool_name.into()).or_default();
        for dep in depends_on {
            let dep = dep.into();
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.scheduled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty()
    }

    /// Drop queued calls and dependency edges.
    pub fn clear(&mut self) {
        self.scheduled.clear();
        self.dependencies.clear();
    }

    /// Linear order of tool names, dependencies before dependents.
    ///
    /// Walks the scheduled names depth-first in submission order. Each name
    /// appears once. A name is marked visited before its dependencies are
    /// walked, so cycles terminate.
    pub fn execution_order(&self) -> Vec<String> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        for call in &self.scheduled {
            self.visit(&call.name, &mut visited, &mut order);
        }
        order
    }

    fn visit(&self, name: &str, visited: &mut HashSet<String>, order: &mut Vec<String>) {
        if !visited.insert(name.to_string()) {
            return;
        }
        if let Some(deps) = self.dependencies.get(name) {
            for dep in deps {
                self.visit(dep, visited, order);
            }
        }
        order.push(name.to_string());
    }

    /// Dependency depth of each tool name. Back edges count as depth zero.
    fn depth(&self, name: &str, memo: &mut HashMap<String, usize>, path: &mut HashSet<String>) -> usize {
        if let Some(&d) = memo.get(name) {
            return d;
        }
        if !path.insert(name.to_string()) {
            return 0;
        }
        let depth = self
            .dependencies
            .get(name)
            .map(|deps| {
                deps.iter()
                    .map(|dep| self.depth(dep, memo, path) + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        path.remove(name);
        memo.insert(name.to_string(), depth);
        depth
    }

    /// Run and drain the queue. Results come back in submission order.
    pub async fn execute_scheduled(&mut self, cancel: &CancellationToken) -> Vec<ToolResult> {
        let calls = std::mem::take(&mut self.scheduled);
        if calls.is_empty() {
            return Vec::new();
        }

        let mut memo = HashMap::new();
        let levels: Vec<usize> = calls
            .iter()
            .map(|c| self.depth(&c.name, &mut memo, &mut HashSet::new()))
            .collect();
        let max_level = levels.iter().copied().max().unwrap_or(0);

        info!(calls = calls.len(), levels = max_level + 1, "executing scheduled tool calls");

        let mut results: Vec<Option<ToolResult>> = vec![None; calls.len()];
        for level in 0..=max_level {
            let batch: Vec<usize> = (0..calls.len()).filter(|&i| levels[i] == level).collect();
            if batch.is_empty() {
                continue;
            }
            debug!(level, calls = batch.len(), "starting scheduler level");
            let done = join_all(batch.iter().map(|&i| self.run_gated(&calls[i], cancel))).await;
            for (i, result) in batch.into_iter().zip(done) {
                results[i] = Some(result);
            }
        }
        results.into_iter().flatten().collect()
    }

    /// Run independent calls concurrently under the gate, ignoring the
    /// queue and dependency edges.
    pub async fn execute_batch(&self, calls: &[ToolCallRequest], cancel: &CancellationToken) -> Vec<ToolResult> {
        join_all(calls.iter().map(|c| self.run_gated(c, cancel))).await
    }

    async fn run_gated(&self, call: &ToolCallRequest, cancel: &CancellationToken) -> ToolResult {
        let Ok(_permit) = self.gate.acquire().await else {
            return ToolResult::failure(call.id.clone(), "scheduler closed");
        };
        self.executor.execute(call, cancel).await
    }
}
