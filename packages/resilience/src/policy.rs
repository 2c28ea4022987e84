//! Typed resiliency policies.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::circuit::CircuitBreaker;
use crate::{
    CircuitBreakerConfig, CircuitState, Classify, FailureKind, PolicyError, PolicyEvent,
    RetryConfig,
};

/// A protected call-site.
///
/// Implemented by marker types; each gets its own policy instance and name.
pub trait CallSite: Send + Sync + 'static {
    /// Name used in logs, events and errors.
    const NAME: &'static str;
}

/// Calls to the movie-data API.
#[derive(Debug)]
pub enum MovieLookup {}

impl CallSite for MovieLookup {
    const NAME: &'static str = "movie-lookup";
}

/// Calls to the completion endpoint behind recommendations.
#[derive(Debug)]
pub enum Recommendation {}

impl CallSite for Recommendation {
    const NAME: &'static str = "recommendation";
}

/// Retry and circuit breaker settings for one policy.
#[derive(Debug, Clone, Default)]
pub struct PolicyConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl PolicyConfig {
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }
}

struct PolicyInner {
    retry: RetryConfig,
    breaker: CircuitBreaker,
}

/// Retry with exponential backoff inside a circuit breaker, for call-site `S`.
///
/// Clones share state. Two policies for different call-sites never do.
pub struct ResiliencePolicy<S: CallSite> {
    inner: Arc<PolicyInner>,
    _site: PhantomData<fn() -> S>,
}

impl<S: CallSite> Clone for ResiliencePolicy<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _site: PhantomData,
        }
    }
}

impl<S: CallSite> std::fmt::Debug for ResiliencePolicy<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResiliencePolicy")
            .field("name", &S::NAME)
            .field("state", &self.state())
            .finish()
    }
}

impl<S: CallSite> Default for ResiliencePolicy<S> {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}

impl<S: CallSite> ResiliencePolicy<S> {
    /// Create a policy that reports only through `tracing`.
    pub fn new(config: PolicyConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a policy that also broadcasts [`PolicyEvent`]s.
    pub fn with_events(config: PolicyConfig, events: broadcast::Sender<PolicyEvent>) -> Self {
        Self::build(config, Some(events))
    }

    fn build(config: PolicyConfig, events: Option<broadcast::Sender<PolicyEvent>>) -> Self {
        Self {
            inner: Arc::new(PolicyInner {
                retry: config.retry,
                breaker: CircuitBreaker::new(S::NAME, config.circuit_breaker, events),
            }),
            _site: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        S::NAME
    }

    /// Current breaker state (for monitoring).
    pub fn state(&self) -> CircuitState {
        self.inner.breaker.state()
    }

    /// Failed calls counted toward opening the circuit.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.breaker.consecutive_failures()
    }

    /// Times the circuit has opened.
    pub fn open_count(&self) -> u64 {
        self.inner.breaker.open_count()
    }

    /// Calls refused without running the operation.
    pub fn rejected_count(&self) -> u64 {
        self.inner.breaker.rejected_count()
    }

    /// Run `operation` under this policy.
    ///
    /// Transient failures are retried with backoff; if every attempt fails
    /// the breaker records one failure and `RetriesExhausted` is returned.
    /// Permanent failures return at once and leave the breaker alone. While
    /// the circuit is open the operation is not invoked.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, PolicyError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::error::Error + 'static,
    {
        let breaker = &self.inner.breaker;
        let retry = &self.inner.retry;

        let permit = breaker
            .try_acquire()
            .map_err(|rejected| PolicyError::CircuitOpen {
                policy: S::NAME,
                retry_after: rejected.retry_after,
            })?;

        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(policy = S::NAME, attempt, "call recovered after retry");
                    }
                    permit.success();
                    return Ok(value);
                }
                Err(error) => match error.classify() {
                    FailureKind::Permanent => {
                        tracing::debug!(
                            policy = S::NAME,
                            error = %error,
                            "permanent failure, not retrying"
                        );
                        permit.neutral();
                        return Err(PolicyError::Permanent {
                            policy: S::NAME,
                            source: error,
                        });
                    }
                    FailureKind::Transient if attempt >= retry.max_retries => {
                        tracing::warn!(
                            policy = S::NAME,
                            attempts = attempt + 1,
                            error = %error,
                            "retries exhausted"
                        );
                        permit.failure();
                        return Err(PolicyError::RetriesExhausted {
                            policy: S::NAME,
                            attempts: attempt + 1,
                            source: error,
                        });
                    }
                    FailureKind::Transient => {
                        attempt += 1;
                        let delay = retry.delay_for_attempt(attempt);
                        tracing::warn!(
                            policy = S::NAME,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "transient failure, retrying"
                        );
                        breaker.notify(PolicyEvent::RetryScheduled {
                            policy: S::NAME,
                            attempt,
                            delay,
                            error: error.to_string(),
                        });
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }
    }
}
