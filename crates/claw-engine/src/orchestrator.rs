//! The turn loop.
//!
//! One `run` call drives turns until the model answers without tool calls,
//! the turn budget is spent, a fatal error occurs or the run is stopped.
//! Within a turn, tool calls execute strictly in the order the model issued
//! them and each produces exactly one tool-result message.
//!
//! Events for a run go to the stream returned by [`Orchestrator::run`] and
//! to the shared [`EventBus`].

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use claw_core::events::{AgentEvent, ConfirmationRequest, EventPayload, LoopState};
use claw_core::ids::{RunId, ToolCallId};
use claw_core::messages::{Message, Role};
use claw_core::model::{ModelClient, ModelRequest};
use claw_core::policy::{ApprovalMode, PolicyDecision};
use claw_core::tools::{ToolCallRequest, ToolResult};
use claw_settings::ClawSettings;
use claw_telemetry::MetricsRecorder;

use crate::compressor::{CompressorConfig, ContextCompressor};
use crate::confirmation::{ConfirmationBroker, ConfirmationOutcome};
use crate::error::EngineError;
use crate::events::EventBus;
use crate::executor::{panic_message, PreparedCall, ToolExecutor};
use crate::policy::PolicyEngine;
use crate::prompt::{ContextGenerator, PromptBuilder, DEFAULT_SYSTEM_PROMPT};
use crate::registry::ToolRegistry;
use crate::risk::{RiskAssessor, RiskLevel};
use crate::scheduler::ToolScheduler;

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub system_prompt: String,
    /// Model calls allowed per run, summary calls included.
    pub max_turns: u32,
    pub temperature: f64,
    pub enable_compression: bool,
    pub approval_mode: ApprovalMode,
    pub tool_timeout: Duration,
    pub max_output_bytes: usize,
    /// Admission gate size for [`Orchestrator::scheduler`].
    pub max_concurrent_tools: usize,
    pub confirmation_timeout: Duration,
    /// Ask before running an allowed call the risk assessor rates high.
    pub escalate_high_risk: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from_settings(&ClawSettings::default())
    }
}

impl AgentConfig {
    pub fn from_settings(settings: &ClawSettings) -> Self {
        Self {
            system_prompt: settings
                .agent
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_turns: settings.agent.max_turns,
            temperature: settings.agent.temperature,
            enable_compression: settings.agent.enable_compression,
            approval_mode: settings.agent.approval_mode,
            tool_timeout: Duration::from_millis(settings.tools.timeout_ms),
            max_output_bytes: settings.tools.max_output_bytes,
            max_concurrent_tools: settings.tools.max_concurrent,
            confirmation_timeout: Duration::from_secs(settings.confirmation.timeout_secs),
            escalate_high_risk: settings.policy.escalate_high_risk,
        }
    }
}

struct ActiveRun {
    id: RunId,
    cancel: CancellationToken,
    turn: Arc<AtomicU32>,
}

struct RunSlot {
    state: LoopState,
    active: Option<ActiveRun>,
}

/// Where a run's events go: its own stream, then the shared bus.
struct EventSink {
    tx: mpsc::UnboundedSender<AgentEvent>,
    bus: Arc<EventBus>,
}

impl EventSink {
    async fn emit(&self, event: AgentEvent) {
        self.bus.publish(&event).await;
        if self.tx.send(event).is_err() {
            debug!("run stream dropped, event not delivered");
        }
    }
}

pub struct Orchestrator {
    model: Arc<dyn ModelClient>,
    registry: Arc<ToolRegistry>,
    executor: Arc<ToolExecutor>,
    policy: RwLock<PolicyEngine>,
    risk: RiskAssessor,
    broker: ConfirmationBroker,
    compressor: ContextCompressor,
    prompt: RwLock<PromptBuilder>,
    bus: Arc<EventBus>,
    metrics: Option<Arc<MetricsRecorder>>,
    config: AgentConfig,
    slot: Mutex<RunSlot>,
    history: Mutex<Vec<Message>>,
    /// Held by a run's loop for as long as it may touch history. A stopped
    /// run keeps it until it reaches its next suspension point.
    history_lock: tokio::sync::Mutex<()>,
}

impl Orchestrator {
    pub fn new(model: Arc<dyn ModelClient>, registry: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        let executor = Arc::new(build_executor(&registry, &config, None));
        let compressor = ContextCompressor::new(Arc::clone(&model), CompressorConfig::default());
        Self {
            policy: RwLock::new(PolicyEngine::with_default_rules(config.approval_mode)),
            risk: RiskAssessor::new(),
            broker: ConfirmationBroker::new().with_timeout(config.confirmation_timeout),
            prompt: RwLock::new(PromptBuilder::new(config.system_prompt.clone())),
            bus: Arc::new(EventBus::new()),
            metrics: None,
            slot: Mutex::new(RunSlot {
                state: LoopState::Idle,
                active: None,
            }),
            history: Mutex::new(Vec::new()),
            history_lock: tokio::sync::Mutex::new(()),
            model,
            registry,
            executor,
            compressor,
            config,
        }
    }

    /// Orchestrator configured entirely from settings.
    pub fn from_settings(model: Arc<dyn ModelClient>, registry: Arc<ToolRegistry>, settings: &ClawSettings) -> Self {
        let config = AgentConfig::from_settings(settings);
        let policy = PolicyEngine::from_settings(&settings.policy, config.approval_mode);
        Self::new(model, registry, config)
            .with_policy(policy)
            .with_compressor_config(CompressorConfig::from_settings(&settings.compressor))
    }

    pub fn with_policy(mut self, policy: PolicyEngine) -> Self {
        self.policy = RwLock::new(policy);
        self
    }

    pub fn with_compressor_config(mut self, config: CompressorConfig) -> Self {
        self.compressor = ContextCompressor::new(Arc::clone(&self.model), config);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.executor = Arc::new(build_executor(&self.registry, &self.config, Some(Arc::clone(&metrics))));
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn state(&self) -> LoopState {
        self.slot.lock().state
    }

    /// Turn number of the active run, 0 when idle.
    pub fn current_turn(&self) -> u32 {
        self.slot
            .lock()
            .active
            .as_ref()
            .map_or(0, |run| run.turn.load(Ordering::Relaxed))
    }

    /// Start a run. Must be called from within a tokio runtime.
    ///
    /// If a run is already in progress the returned stream carries a single
    /// error event and the in-flight run is untouched.
    pub fn run(self: &Arc<Self>, input: impl Into<String>) -> UnboundedReceiverStream<AgentEvent> {
        let (tx, rx) = mpsc::unbounded_channel();

        let started = {
            let mut slot = self.slot.lock();
            if slot.state == LoopState::Running {
                None
            } else {
                let run = ActiveRun {
                    id: RunId::new(),
                    cancel: CancellationToken::new(),
                    turn: Arc::new(AtomicU32::new(0)),
                };
                let handles = (run.id.clone(), run.cancel.clone(), Arc::clone(&run.turn));
                slot.state = LoopState::Running;
                slot.active = Some(run);
                Some(handles)
            }
        };

        match started {
            None => {
                warn!("run rejected, agent is already running");
                let event = AgentEvent::error(EngineError::AlreadyRunning.to_string());
                let bus = Arc::clone(&self.bus);
                let published = event.clone();
                tokio::spawn(async move { bus.publish(&published).await });
                let _ = tx.send(event);
            }
            Some((run_id, cancel, turn)) => {
                let sink = EventSink {
                    tx,
                    bus: Arc::clone(&self.bus),
                };
                let this = Arc::clone(self);
                let input = input.into();
                tokio::spawn(async move { this.drive(run_id, input, cancel, turn, sink).await });
            }
        }

        UnboundedReceiverStream::new(rx)
    }

    #[instrument(skip_all, fields(run_id = %run_id))]
    async fn drive(
        self: Arc<Self>,
        run_id: RunId,
        input: String,
        cancel: CancellationToken,
        turn: Arc<AtomicU32>,
        sink: EventSink,
    ) {
        sink.emit(AgentEvent::state_changed(LoopState::Running)).await;
        info!("run started");

        let outcome = AssertUnwindSafe(self.run_turns(input, &cancel, &turn, &sink))
            .catch_unwind()
            .await;

        let (terminal, closing) = match outcome {
            Ok(_) if cancel.is_cancelled() => (LoopState::Idle, None),
            Ok(Ok(turns)) => {
                info!(turns, "run completed");
                (
                    LoopState::Completed,
                    Some(AgentEvent::new(EventPayload::Completed { turns })),
                )
            }
            Ok(Err(e)) => {
                error!(error = %e, kind = e.error_kind(), "run failed");
                (LoopState::Error, Some(AgentEvent::error(e.to_string())))
            }
            Err(panic) => {
                let e = EngineError::Internal(panic_message(&panic));
                error!(error = %e, "run panicked");
                (LoopState::Error, Some(AgentEvent::error(e.to_string())))
            }
        };

        let final_state = {
            let mut slot = self.slot.lock();
            if slot.active.as_ref().is_some_and(|run| run.id == run_id) {
                slot.active = None;
                slot.state = terminal;
                terminal
            } else {
                // stop() already released the slot.
                LoopState::Idle
            }
        };
        if final_state == LoopState::Idle {
            info!("run stopped");
        }

        if let Some(event) = closing {
            sink.emit(event).await;
        }
        sink.emit(AgentEvent::state_changed(final_state)).await;
    }

    async fn run_turns(
        &self,
        input: String,
        cancel: &CancellationToken,
        turn: &AtomicU32,
        sink: &EventSink,
    ) -> Result<u32, EngineError> {
        let _history_guard = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(EngineError::Aborted),
            guard = self.history_lock.lock() => guard,
        };

        self.history.lock().push(Message::user(input.clone()));
        sink.emit(AgentEvent::message(Role::User, input)).await;

        let mut model_calls = 0u32;
        while model_calls < self.config.max_turns {
            if cancel.is_cancelled() {
                return Err(EngineError::Aborted);
            }
            let current = turn.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(turn = current, "turn started");

            // A summary needs its own call and must leave one for the turn.
            if self.config.enable_compression
                && model_calls + 1 < self.config.max_turns
                && self.compress_if_needed(cancel, sink).await?
            {
                model_calls += 1;
            }

            let request = self.build_request();
            sink.emit(AgentEvent::thinking("Thinking...")).await;
            self.count("model_calls_total", &[]);

            let response = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(EngineError::Aborted),
                response = self.model.generate(&request) => response?,
            };
            model_calls += 1;

            let text = response.text().to_string();
            if !text.is_empty() {
                sink.emit(AgentEvent::message(Role::Assistant, text.clone())).await;
            }

            if !response.has_tool_calls() {
                self.history.lock().push(Message::assistant(text));
                return Ok(current);
            }

            let calls = response.tool_calls;
            sink.emit(AgentEvent::new(EventPayload::ToolCallIssued { calls: calls.clone() }))
                .await;
            let content = (!text.is_empty()).then_some(text);
            self.history
                .lock()
                .push(Message::assistant_with_calls(content, calls.clone()));

            for call in &calls {
                let result = self.process_call(call, cancel, sink).await;
                self.history.lock().push(Message::tool_result(&result));
                sink.emit(AgentEvent::new(EventPayload::ToolResult { result })).await;
            }

            if cancel.is_cancelled() {
                return Err(EngineError::Aborted);
            }
        }

        let turns = turn.load(Ordering::Relaxed);
        info!(turns, model_calls, "turn budget reached");
        Ok(turns)
    }

    /// Returns whether a summary call was made.
    async fn compress_if_needed(&self, cancel: &CancellationToken, sink: &EventSink) -> Result<bool, EngineError> {
        let snapshot = self.history.lock().clone();
        if !self.compressor.needs_summary(&snapshot) {
            return Ok(false);
        }

        sink.emit(AgentEvent::thinking("Compressing conversation history...")).await;
        let before = snapshot.len();
        let compacted = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(EngineError::Aborted),
            result = self.compressor.compress(snapshot) => result.map_err(EngineError::Compression)?,
        };

        debug!(before, after = compacted.len(), "history replaced with summary");
        self.count("compressions_total", &[]);
        *self.history.lock() = compacted;
        Ok(true)
    }

    fn build_request(&self) -> ModelRequest {
        let tools = self.registry.list();
        let system_prompt = self.prompt.read().build(&tools);
        ModelRequest {
            messages: self.history.lock().clone(),
            tools,
            system_prompt: Some(system_prompt),
            temperature: self.config.temperature,
        }
    }

    /// Policy, confirmation and execution for one call. Never fails: every
    /// outcome is a result for the model.
    #[instrument(skip_all, fields(tool = %call.name, call_id = %call.id))]
    async fn process_call(&self, call: &ToolCallRequest, cancel: &CancellationToken, sink: &EventSink) -> ToolResult {
        if cancel.is_cancelled() {
            return ToolResult::failure(call.id.clone(), "Execution cancelled");
        }

        let prepared = match self.executor.prepare(call) {
            Ok(prepared) => prepared,
            Err(failed) => return failed,
        };

        let policy_decision = self.policy.read().check(&call.name, prepared.category, &call.arguments);
        let risk = self.risk.assess(&call.name, prepared.category, &call.arguments);
        let decision = self.escalate(policy_decision, risk);
        self.count("policy_decisions_total", &[("decision", decision.as_str())]);
        debug!(decision = decision.as_str(), risk = %risk, "policy decision");

        match decision {
            PolicyDecision::Allow => {}
            PolicyDecision::Deny => {
                info!("tool call denied by policy");
                return ToolResult::failure(
                    call.id.clone(),
                    format!("Tool '{}' is not allowed by policy", call.name),
                );
            }
            PolicyDecision::AskUser => match self.confirm(&prepared, risk, cancel, sink).await {
                ConfirmationOutcome::Approved => {}
                ConfirmationOutcome::Denied => {
                    return ToolResult::failure(
                        call.id.clone(),
                        format!("User denied execution of '{}'", call.name),
                    );
                }
                ConfirmationOutcome::TimedOut => {
                    return ToolResult::failure(
                        call.id.clone(),
                        format!("Confirmation for '{}' timed out; execution denied", call.name),
                    );
                }
            },
        }

        self.executor.run(prepared, cancel).await
    }

    /// Stricter of the policy decision and the risk rating. Unrestricted
    /// mode is never escalated.
    fn escalate(&self, decision: PolicyDecision, risk: RiskLevel) -> PolicyDecision {
        let escalate = self.config.escalate_high_risk
            && risk == RiskLevel::High
            && decision == PolicyDecision::Allow
            && self.policy.read().mode() != ApprovalMode::Unrestricted;
        if escalate {
            info!("high-risk call escalated to confirmation");
            PolicyDecision::AskUser
        } else {
            decision
        }
    }

    async fn confirm(
        &self,
        prepared: &PreparedCall,
        risk: RiskLevel,
        cancel: &CancellationToken,
        sink: &EventSink,
    ) -> ConfirmationOutcome {
        let call = &prepared.call;
        let (title, mut prompt) = match prepared.invocation.confirmation_details() {
            Some(details) => (details.title, details.prompt),
            None => (
                format!("Confirm tool: {}", call.name),
                PolicyEngine::confirmation_prompt(
                    &call.name,
                    &call.arguments,
                    &prepared.invocation.affected_locations(),
                ),
            ),
        };
        if risk != RiskLevel::Low {
            prompt = format!("**Risk:** {risk}\n\n{prompt}");
        }

        let pending = self.broker.request(ConfirmationRequest {
            call_id: call.id.clone(),
            title,
            prompt,
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
        });
        sink.emit(pending.event()).await;

        tokio::select! {
            outcome = pending.wait() => outcome,
            () = cancel.cancelled() => ConfirmationOutcome::Denied,
        }
    }

    /// Resolve a pending confirmation. False if nothing was pending for
    /// `call_id`.
    pub fn respond_to_confirmation(&self, call_id: &ToolCallId, approved: bool) -> bool {
        self.broker.respond(call_id, approved)
    }

    pub fn pending_confirmations(&self) -> Vec<ConfirmationRequest> {
        self.broker.pending()
    }

    /// Cancel the active run and deny every pending confirmation. The state
    /// becomes Idle immediately; the loop winds down at its next suspension
    /// point without a Completed event. Returns whether a run was active.
    pub fn stop(&self) -> bool {
        let stopped = {
            let mut slot = self.slot.lock();
            let active = slot.active.take();
            if let Some(run) = &active {
                run.cancel.cancel();
            }
            slot.state = LoopState::Idle;
            active.map(|run| run.id)
        };
        let denied = self.broker.cancel_all();

        match stopped {
            Some(run_id) => {
                info!(run_id = %run_id, denied, "stop requested");
                true
            }
            None => false,
        }
    }

    /// Snapshot of the conversation history.
    pub fn history(&self) -> Vec<Message> {
        self.history.lock().clone()
    }

    /// Empty the history. Rejected while a run still owns it.
    pub fn clear_history(&self) -> Result<(), EngineError> {
        let Ok(_guard) = self.history_lock.try_lock() else {
            return Err(EngineError::AlreadyRunning);
        };
        if self.state() == LoopState::Running {
            return Err(EngineError::AlreadyRunning);
        }
        self.history.lock().clear();
        Ok(())
    }

    pub fn approval_mode(&self) -> ApprovalMode {
        self.policy.read().mode()
    }

    pub fn set_approval_mode(&self, mode: ApprovalMode) {
        self.policy.write().set_mode(mode);
        info!(mode = ?mode, "approval mode changed");
    }

    /// Adjust the policy in place (allow/deny sets, rules).
    pub fn update_policy(&self, f: impl FnOnce(&mut PolicyEngine)) {
        f(&mut self.policy.write());
    }

    pub fn add_context_generator(&self, name: impl Into<String>, generator: Arc<dyn ContextGenerator>) {
        self.prompt.write().add_generator(name, generator);
    }

    pub fn remove_context_generator(&self, name: &str) -> bool {
        self.prompt.write().remove_generator(name)
    }

    /// A fresh batch scheduler over the same tools. Calls scheduled there
    /// bypass policy and confirmation.
    pub fn scheduler(&self) -> ToolScheduler {
        ToolScheduler::new(Arc::clone(&self.executor), self.config.max_concurrent_tools)
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    fn count(&self, name: &str, labels: &[(&str, &str)]) {
        if let Some(metrics) = &self.metrics {
            metrics.counter_inc(name, labels, 1);
        }
    }
}

fn build_executor(
    registry: &Arc<ToolRegistry>,
    config: &AgentConfig,
    metrics: Option<Arc<MetricsRecorder>>,
) -> ToolExecutor {
    let executor = ToolExecutor::new(Arc::clone(registry))
        .with_timeout(config.tool_timeout)
        .with_max_output_bytes(config.max_output_bytes);
    match metrics {
        Some(metrics) => executor.with_metrics(metrics),
        None => executor,
    }
}
