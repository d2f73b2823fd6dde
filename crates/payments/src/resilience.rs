//! Bounded retry with exponential backoff, wrapped in a circuit breaker.
//!
//! # States
//!
//! - **Closed**: calls pass through; consecutive failures are counted.
//! - **Open**: calls fail immediately with [`GatewayError::CircuitOpen`] until the timeout elapses.
//! - **HalfOpen**: one trial call is let through; success closes, failure re-opens.
//!   A trial call that is dropped re-opens the circuit, and one that outlives the
//!   open timeout is replaced by a fresh trial call.
//!
//! Only infrastructure failures ([`GatewayError::is_retryable`]) are retried
//! or counted by the breaker. A provider declining a payment is an answer,
//! not an outage.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::GatewayError;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    pub initial_delay: Duration,
    /// Cap for the exponential backoff.
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(delay_ms as u64);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the policy is exhausted. Returns the last error.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Gateway call succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Gateway call failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    tracing::error!(attempts = attempt + 1, error = %err, "Gateway call failed after all retries");
                }
                return Err(err);
            }
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: usize,
    /// How long the circuit stays open before a trial call is allowed.
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: State,
    failure_count: usize,
    opened_at: Option<Instant>,
    /// Start of the half-open trial call currently in flight.
    trial_started_at: Option<Instant>,
}

/// How a call was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial(Instant),
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    state: Arc<RwLock<BreakerState>>,
}

/// Re-opens the circuit if a half-open trial call is dropped before it finishes.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    started_at: Option<Instant>,
}

impl TrialGuard<'_> {
    fn disarm(&mut self) {
        self.started_at = None;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        let Some(started_at) = self.started_at else {
            return;
        };
        // If the lock is contended the trial call deadline in `admit` still frees the circuit.
        if let Ok(mut state) = self.breaker.state.try_write()
            && state.state == State::HalfOpen
            && state.trial_started_at == Some(started_at)
        {
            tracing::warn!("Circuit breaker trial call abandoned, re-opening");
            state.state = State::Open;
            state.opened_at = Some(Instant::now());
            state.trial_started_at = None;
        }
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(RwLock::new(BreakerState {
                state: State::Closed,
                failure_count: 0,
                opened_at: None,
                trial_started_at: None,
            })),
        }
    }

    pub async fn state(&self) -> State {
        self.state.read().await.state
    }

    /// Runs `operation` unless the circuit is open.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let Some(admission) = self.admit().await else {
            return Err(GatewayError::CircuitOpen);
        };
        let mut guard = TrialGuard {
            breaker: self,
            started_at: match admission {
                Admission::Trial(at) => Some(at),
                Admission::Normal => None,
            },
        };

        let result = operation().await;
        guard.disarm();
        match &result {
            Err(err) if err.is_retryable() => self.on_failure().await,
            _ => self.on_success().await,
        }
        result
    }

    async fn admit(&self) -> Option<Admission> {
        let mut state = self.state.write().await;
        let timeout = self.config.open_timeout;

        match state.state {
            State::Closed => Some(Admission::Normal),
            State::HalfOpen => {
                // A trial call that outlives the open timeout is treated as lost.
                let stale = state
                    .trial_started_at
                    .is_none_or(|at| at.elapsed() >= timeout);
                if !stale {
                    return None;
                }
                tracing::warn!("Circuit breaker trial call timed out, admitting a new trial call");
                let now = Instant::now();
                state.trial_started_at = Some(now);
                Some(Admission::Trial(now))
            }
            State::Open => {
                let expired = state.opened_at.is_some_and(|at| at.elapsed() >= timeout);
                if !expired {
                    return None;
                }
                tracing::info!("Circuit breaker transitioning OPEN -> HALF_OPEN");
                let now = Instant::now();
                state.state = State::HalfOpen;
                state.trial_started_at = Some(now);
                Some(Admission::Trial(now))
            }
        }
    }

    async fn on_success(&self) {
        let mut state = self.state.write().await;
        if state.state == State::HalfOpen {
            tracing::info!("Circuit breaker transitioning HALF_OPEN -> CLOSED");
        }
        state.state = State::Closed;
        state.failure_count = 0;
        state.opened_at = None;
        state.trial_started_at = None;
    }

    async fn on_failure(&self) {
        let mut state = self.state.write().await;

        match state.state {
            State::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = state.failure_count,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker transitioning CLOSED -> OPEN"
                    );
                    state.state = State::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            State::HalfOpen | State::Open => {
                tracing::warn!("Circuit breaker trial call failed, re-opening");
                state.state = State::Open;
                state.opened_at = Some(Instant::now());
                state.trial_started_at = None;
            }
        }
    }
}

/// Per-adapter resilience settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ResilienceConfig {
    /// Timeout applied to each HTTP request.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Retry-inside-breaker wrapper owned by one adapter.
#[derive(Debug, Clone)]
pub struct ResilientCaller {
    gateway: &'static str,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl ResilientCaller {
    pub fn new(gateway: &'static str, config: &ResilienceConfig) -> Self {
        Self {
            gateway,
            retry: config.retry.clone(),
            breaker: CircuitBreaker::new(config.breaker.clone()),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Runs one logical provider call. The breaker sees a single outcome for
    /// the whole retry sequence.
    pub async fn call<F, Fut, T>(&self, operation: &'static str, f: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let start = Instant::now();
        let result = self
            .breaker
            .call(|| retry_with_backoff(&self.retry, f))
            .await;

        metrics::histogram!(
            "gateway_request_duration_seconds",
            "gateway" => self.gateway,
            "operation" => operation
        )
        .record(start.elapsed().as_secs_f64());

        if matches!(result, Err(GatewayError::CircuitOpen)) {
            tracing::warn!(gateway = self.gateway, operation, "Circuit breaker is OPEN, rejecting request");
            metrics::counter!("gateway_circuit_rejections_total", "gateway" => self.gateway)
                .increment(1);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(max_retries)
            .with_initial_delay(Duration::from_millis(1))
    }

    #[test]
    fn delay_grows_and_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicUsize::new(0);
        let result = retry_with_backoff(&fast_policy(3), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(GatewayError::Timeout)
            } else {
                Ok("ok")
            }
        })
        .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_rejections() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast_policy(3), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(GatewayError::Rejected {
                code: "49".into(),
                message: "declined".into(),
            })
        })
        .await;

        assert!(matches!(result, Err(GatewayError::Rejected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast_policy(2), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(GatewayError::Transport("refused".into()))
        })
        .await;

        assert!(matches!(result, Err(GatewayError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn breaker_opens_and_recovers() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            open_timeout: Duration::from_millis(20),
        });

        for _ in 0..2 {
            let _ = breaker
                .call(|| async { Err::<(), _>(GatewayError::Timeout) })
                .await;
        }
        assert_eq!(breaker.state().await, State::Open);

        let rejected = breaker.call(|| async { Ok::<_, GatewayError>(1) }).await;
        assert_eq!(rejected, Err(GatewayError::CircuitOpen));

        tokio::time::sleep(Duration::from_millis(30)).await;
        let trial = breaker.call(|| async { Ok::<_, GatewayError>(1) }).await;
        assert_eq!(trial, Ok(1));
        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn abandoned_half_open_call_reopens_the_breaker() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout: Duration::from_millis(20),
        });
        let _ = breaker
            .call(|| async { Err::<(), _>(GatewayError::Timeout) })
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(5),
            breaker.call(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, GatewayError>(0)
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(breaker.state().await, State::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let trial = breaker.call(|| async { Ok::<_, GatewayError>(1) }).await;
        assert_eq!(trial, Ok(1));
        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn stuck_half_open_call_does_not_block_forever() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout: Duration::from_millis(20),
        });
        let _ = breaker
            .call(|| async { Err::<(), _>(GatewayError::Timeout) })
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let hung_breaker = breaker.clone();
        let hung = tokio::spawn(async move {
            hung_breaker
                .call(|| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, GatewayError>(0)
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        let rejected = breaker.call(|| async { Ok::<_, GatewayError>(1) }).await;
        assert_eq!(rejected, Err(GatewayError::CircuitOpen));

        tokio::time::sleep(Duration::from_millis(30)).await;
        let trial = breaker.call(|| async { Ok::<_, GatewayError>(2) }).await;
        assert_eq!(trial, Ok(2));
        assert_eq!(breaker.state().await, State::Closed);
        hung.abort();
    }

    #[tokio::test]
    async fn rejections_do_not_trip_the_breaker() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout: Duration::from_secs(60),
        });
        let _ = breaker
            .call(|| async {
                Err::<(), _>(GatewayError::Rejected {
                    code: "1".into(),
                    message: "no".into(),
                })
            })
            .await;
        assert_eq!(breaker.state().await, State::Closed);
    }
}
