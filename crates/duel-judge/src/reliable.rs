use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use tokio::time::Instant;
use tracing::{info, warn};

use duel_core::challenge::TestCase;
use duel_core::errors::JudgeError;
use duel_core::judge::{JudgeGateway, Verdict};

/// Retry, timeout and circuit breaker settings for judge calls.
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    /// Upper bound for a single judge attempt.
    pub attempt_timeout: Duration,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            jitter_factor: 0.2,
            attempt_timeout: Duration::from_secs(10),
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Wraps a judge with bounded retries and a circuit breaker.
///
/// - Only transient I/O failures are retried; a failing verdict is a
///   successful call and is returned as-is
/// - Each attempt is bounded by `attempt_timeout`
/// - Circuit breaker: N consecutive failures → open → cooldown → half-open → success → closed
/// - Rejections (the judge refusing this particular submission) do not count
///   toward the breaker
pub struct ReliableJudge<J: JudgeGateway> {
    inner: J,
    config: ReliableConfig,
    circuit_state: Arc<RwLock<CircuitState>>,
    consecutive_failures: Arc<AtomicU32>,
    total_retries: Arc<AtomicU64>,
}

impl<J: JudgeGateway> ReliableJudge<J> {
    pub fn new(inner: J, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            circuit_state: Arc::new(RwLock::new(CircuitState::Closed)),
            consecutive_failures: Arc::new(AtomicU32::new(0)),
            total_retries: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_defaults(inner: J) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    fn check_circuit(&self) -> Result<(), JudgeError> {
        let state = self.circuit_state.read();
        match &*state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open { since } => {
                if since.elapsed() >= self.config.circuit_breaker_cooldown {
                    drop(state);
                    *self.circuit_state.write() = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(JudgeError::CircuitOpen)
                }
            }
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.circuit_state.write();
        if *state != CircuitState::Closed {
            info!(judge = self.inner.name(), "circuit breaker closed after successful call");
            *state = CircuitState::Closed;
        }
    }

    fn record_failure(&self, error: &JudgeError) {
        if matches!(error, JudgeError::Rejected(_)) {
            return;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.config.circuit_breaker_threshold {
            let mut state = self.circuit_state.write();
            if *state == CircuitState::Closed || *state == CircuitState::HalfOpen {
                warn!(
                    judge = self.inner.name(),
                    failures,
                    cooldown_secs = self.config.circuit_breaker_cooldown.as_secs(),
                    "circuit breaker opened"
                );
                *state = CircuitState::Open {
                    since: Instant::now(),
                };
            }
        }
    }

    /// Exponential backoff with jitter.
    fn retry_delay(&self, attempt: u32) -> Duration {
        let exp_delay = self.config.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let capped = exp_delay.min(self.config.max_delay.as_millis() as f64);

        let jitter_range = capped * self.config.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(1.0) as u64)
    }

    async fn attempt(&self, code: &str, test_cases: &[TestCase]) -> Result<Verdict, JudgeError> {
        match tokio::time::timeout(
            self.config.attempt_timeout,
            self.inner.evaluate(code, test_cases),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(JudgeError::Timeout(self.config.attempt_timeout)),
        }
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
}

#[async_trait]
impl<J: JudgeGateway> JudgeGateway for ReliableJudge<J> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn evaluate(&self, code: &str, test_cases: &[TestCase]) -> Result<Verdict, JudgeError> {
        self.check_circuit()?;

        let mut last_error: Option<JudgeError> = None;

        for attempt in 0..=self.config.max_retries {
            match self.attempt(code, test_cases).await {
                Ok(verdict) => {
                    self.record_success();
                    return Ok(verdict);
                }
                Err(e) => {
                    if !e.is_retryable() || attempt == self.config.max_retries {
                        self.record_failure(&e);
                        return Err(e);
                    }

                    let delay = self.retry_delay(attempt);
                    self.total_retries.fetch_add(1, Ordering::Relaxed);

                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying judge call"
                    );

                    last_error = Some(e);
                    tokio::time::sleep(delay).await;

                    self.check_circuit()?;
                }
            }
        }

        Err(last_error.unwrap_or(JudgeError::Unreachable("max retries exceeded".into())))
    }
}
