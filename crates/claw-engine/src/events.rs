//! Publish/subscribe fan-out for agent events.
//!
//! Every event the orchestrator emits on its run stream is also published
//! here. Subscribers run sequentially in registration order, each under a
//! timeout.
//!
//! # Fail-Open
//!
//! A subscriber failure never affects the run or the other subscribers. It
//! is logged at `warn` and counted per subscriber.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, instrument, warn};

use claw_core::events::{AgentEvent, EventKind};

use crate::executor::panic_message;

pub const DEFAULT_SUBSCRIBER_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives published events.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Unique name, used for unsubscribing and in logs.
    fn name(&self) -> &str;

    async fn on_event(&self, event: &AgentEvent) -> anyhow::Result<()>;
}

struct Subscription {
    subscriber: Arc<dyn EventSubscriber>,
    /// `None` receives every kind.
    kinds: Option<HashSet<EventKind>>,
    failures: AtomicU32,
}

impl Subscription {
    fn wants(&self, kind: EventKind) -> bool {
        self.kinds.as_ref().map_or(true, |k| k.contains(&kind))
    }
}

pub struct EventBus {
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    timeout: Duration,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            timeout: DEFAULT_SUBSCRIBER_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a subscriber. `kinds` limits delivery to those event kinds; `None`
    /// delivers everything. A subscriber with the same name is replaced.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>, kinds: Option<Vec<EventKind>>) {
        let name = subscriber.name().to_string();
        let subscription = Arc::new(Subscription {
            subscriber,
            kinds: kinds.map(|k| k.into_iter().collect()),
            failures: AtomicU32::new(0),
        });

        let mut subs = self.subscriptions.write();
        match subs.iter_mut().find(|s| s.subscriber.name() == name) {
            Some(existing) => *existing = subscription,
            None => subs.push(subscription),
        }
        debug!(subscriber = %name, "event subscriber registered");
    }

    pub fn unsubscribe(&self, name: &str) -> bool {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.subscriber.name() != name);
        subs.len() != before
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Failures recorded for `name`, or `None` if it is not subscribed.
    #[must_use]
    pub fn failure_count(&self, name: &str) -> Option<u32> {
        self.subscriptions
            .read()
            .iter()
            .find(|s| s.subscriber.name() == name)
            .map(|s| s.failures.load(Ordering::Relaxed))
    }

    /// Deliver `event` to every interested subscriber.
    #[instrument(skip_all, fields(event_type = event.event_type()))]
    pub async fn publish(&self, event: &AgentEvent) {
        let kind = event.kind();
        let targets: Vec<Arc<Subscription>> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.wants(kind))
            .cloned()
            .collect();

        for sub in targets {
            self.deliver(&sub, event).await;
        }
    }

    async fn deliver(&self, sub: &Subscription, event: &AgentEvent) {
        let name = sub.subscriber.name();
        let outcome = tokio::time::timeout(
            self.timeout,
            AssertUnwindSafe(sub.subscriber.on_event(event)).catch_unwind(),
        )
        .await;

        let failure = match outcome {
            Ok(Ok(Ok(()))) => return,
            Ok(Ok(Err(e))) => format!("error: {e}"),
            Ok(Err(panic)) => format!("panic: {}", panic_message(&panic)),
            Err(_) => format!("timed out after {}ms", self.timeout.as_millis()),
        };
        let failures = sub.failures.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(subscriber = %name, failures, reason = %failure, "event subscriber failed (fail-open)");
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
