use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use claw_core::events::{AgentEvent, ConfirmationRequest, EventPayload};
use claw_core::ids::ToolCallId;

pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Approved,
    Denied,
    TimedOut,
}

impl ConfirmationOutcome {
    pub fn is_approved(self) -> bool {
        self == Self::Approved
    }
}

struct PendingEntry {
    request: ConfirmationRequest,
    responder: oneshot::Sender<bool>,
    ticket: u64,
}

type PendingMap = DashMap<ToolCallId, PendingEntry>;

/// Suspends tool calls until a human approves or denies them.
///
/// Each call id has at most one pending entry. Whoever removes the entry first
/// (a responder, `cancel_all`, or the waiter's own timeout) decides the
/// outcome; later attempts are no-ops.
#[derive(Clone)]
pub struct ConfirmationBroker {
    pending: Arc<PendingMap>,
    next_ticket: Arc<AtomicU64>,
    timeout: Duration,
}

impl ConfirmationBroker {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_ticket: Arc::new(AtomicU64::new(0)),
            timeout: DEFAULT_CONFIRMATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a pending confirmation.
    ///
    /// The notification event is only obtainable from the returned handle, so
    /// a responder can never see the request before the broker is listening.
    /// Re-requesting an id that is still pending denies the earlier waiter.
    pub fn request(&self, request: ConfirmationRequest) -> PendingConfirmation {
        let (tx, rx) = oneshot::channel();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let call_id = request.call_id.clone();

        let entry = PendingEntry {
            request: request.clone(),
            responder: tx,
            ticket,
        };
        if self.pending.insert(call_id.clone(), entry).is_some() {
            warn!(call_id = %call_id, "replaced pending confirmation, earlier waiter denied");
        }
        debug!(call_id = %call_id, tool = %request.tool_name, "confirmation registered");

        PendingConfirmation {
            request,
            rx,
            timeout: self.timeout,
            registration: Registration {
                pending: Arc::clone(&self.pending),
                call_id,
                ticket,
            },
        }
    }

    /// Resolve a pending confirmation. Returns false if nothing was pending
    /// for `call_id`.
    pub fn respond(&self, call_id: &ToolCallId, approved: bool) -> bool {
        match self.pending.remove(call_id) {
            Some((_, entry)) => {
                // The waiter may already be gone; the entry is resolved either way.
                let _ = entry.responder.send(approved);
                info!(call_id = %call_id, approved, "confirmation resolved");
                true
            }
            None => {
                debug!(call_id = %call_id, "no pending confirmation for response");
                false
            }
        }
    }

    /// Deny every pending confirmation. Returns how many were pending.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<ToolCallId> = self.pending.iter().map(|e| e.key().clone()).collect();
        let cancelled = ids.iter().filter(|id| self.respond(id, false)).count();
        if cancelled > 0 {
            info!(cancelled, "cancelled pending confirmations");
        }
        cancelled
    }

    /// Snapshot of outstanding requests, ordered by call id.
    pub fn pending(&self) -> Vec<ConfirmationRequest> {
        let mut requests: Vec<ConfirmationRequest> =
            self.pending.iter().map(|e| e.value().request.clone()).collect();
        requests.sort_by(|a, b| a.call_id.as_str().cmp(b.call_id.as_str()));
        requests
    }

    pub fn is_pending(&self, call_id: &ToolCallId) -> bool {
        self.pending.contains_key(call_id)
    }
}

impl Default for ConfirmationBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the broker entry if the handle is dropped unresolved.
struct Registration {
    pending: Arc<PendingMap>,
    call_id: ToolCallId,
    ticket: u64,
}

impl Registration {
    /// Remove our entry if it is still ours. True if we removed it.
    fn withdraw(&self) -> bool {
        self.pending
            .remove_if(&self.call_id, |_, entry| entry.ticket == self.ticket)
            .is_some()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.withdraw();
    }
}

/// Handle for one registered confirmation.
pub struct PendingConfirmation {
    request: ConfirmationRequest,
    rx: oneshot::Receiver<bool>,
    timeout: Duration,
    registration: Registration,
}

impl PendingConfirmation {
    pub fn call_id(&self) -> &ToolCallId {
        &self.request.call_id
    }

    pub fn request(&self) -> &ConfirmationRequest {
        &self.request
    }

    /// The `ConfirmationRequested` event to publish.
    pub fn event(&self) -> AgentEvent {
        AgentEvent::new(EventPayload::ConfirmationRequested {
            request: self.request.clone(),
        })
    }

    /// Wait for a response or the timeout, whichever resolves the entry first.
    pub async fn wait(self) -> ConfirmationOutcome {
        let PendingConfirmation {
            request,
            mut rx,
            timeout,
            registration,
        } = self;

        let outcome = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(true)) => ConfirmationOutcome::Approved,
            // Explicit denial, or the sender was dropped by a replacement.
            Ok(Ok(false)) | Ok(Err(_)) => ConfirmationOutcome::Denied,
            Err(_) => {
                if registration.withdraw() {
                    ConfirmationOutcome::TimedOut
                } else {
                    // A responder removed the entry first; its answer is in flight.
                    match rx.await {
                        Ok(true) => ConfirmationOutcome::Approved,
                        _ => ConfirmationOutcome::Denied,
                    }
                }
            }
        };

        if outcome == ConfirmationOutcome::TimedOut {
            warn!(
                call_id = %request.call_id,
                tool = %request.tool_name,
                timeout_secs = timeout.as_secs(),
                "confirmation timed out, treating as denied"
            );
        }
        outcome
    }
}
