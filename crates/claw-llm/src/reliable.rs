use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use tokio::time::Instant;
use tracing::{info, warn};

use claw_core::errors::ModelError;
use claw_core::messages::Message;
use claw_core::model::{ModelClient, ModelRequest, TextStream};

#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Wraps a [`ModelClient`] with retries and a circuit breaker.
///
/// - Retryable errors back off exponentially with jitter, honoring
///   `retry_after` hints
/// - Fatal and operational errors are returned immediately
/// - N consecutive failed calls open the circuit; after the cooldown one probe
///   call is let through
pub struct ReliableModel<M: ModelClient> {
    inner: M,
    config: ReliableConfig,
    circuit_state: RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
    total_retries: AtomicU64,
}

impl<M: ModelClient> ReliableModel<M> {
    pub fn new(inner: M, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            circuit_state: RwLock::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: M) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state_name(&self) -> &'static str {
        match &*self.circuit_state.read() {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn check_circuit(&self) -> Result<(), ModelError> {
        let mut state = self.circuit_state.write();
        match *state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open { since } => {
                if since.elapsed() >= self.config.circuit_breaker_cooldown {
                    *state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(ModelError::Overloaded)
                }
            }
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.circuit_state.write();
        if *state != CircuitState::Closed {
            info!("circuit breaker closed after successful call");
            *state = CircuitState::Closed;
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        let mut state = self.circuit_state.write();
        let should_open = *state == CircuitState::HalfOpen
            || (*state == CircuitState::Closed && failures >= self.config.circuit_breaker_threshold);
        if should_open {
            warn!(
                failures,
                cooldown_secs = self.config.circuit_breaker_cooldown.as_secs(),
                "circuit breaker opened"
            );
            *state = CircuitState::Open {
                since: Instant::now(),
            };
        }
    }

    /// Exponential backoff capped at `max_delay`, +/- `jitter_factor`.
    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay;
        }
        let exp_ms = self.config.base_delay.as_millis() as f64 * 2f64.powi(attempt as i32);
        let capped = exp_ms.min(self.config.max_delay.as_millis() as f64);
        let jitter_range = capped * self.config.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }

    async fn with_retries<T, F, Fut>(&self, mut call: F) -> Result<T, ModelError>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T, ModelError>> + Send,
        T: Send,
    {
        self.check_circuit()?;

        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => {
                    self.record_success();
                    return Ok(value);
                }
                Err(e) => {
                    if !e.is_retryable() || attempt >= self.config.max_retries {
                        self.record_failure();
                        return Err(e);
                    }

                    let delay = self.retry_delay(attempt, e.suggested_delay());
                    self.total_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        kind = e.error_kind(),
                        "retrying model call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl<M: ModelClient> ModelClient for ReliableModel<M> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, request: &ModelRequest) -> Result<Message, ModelError> {
        self.with_retries(|| self.inner.generate(request)).await
    }

    /// Only establishing the stream is retried; chunks already yielded are
    /// never replayed.
    async fn generate_stream(&self, request: &ModelRequest) -> Result<TextStream, ModelError> {
        self.with_retries(|| self.inner.generate_stream(request)).await
    }
}
