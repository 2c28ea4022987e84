//! Circuit breaker state machine.
//!
//! The breaker hands out permits. A permit taken while Closed is a normal
//! call; the first permit after the break duration is the single HalfOpen
//! probe. Outcomes are reported back through the permit, and dropping an
//! unresolved probe (the caller was cancelled) frees the probe slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::PolicyEvent;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls fail immediately.
    Open,
    /// One trial call is allowed through to probe recovery.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for the circuit breaker sub-policy.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failed calls (after retries) that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a probe.
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            break_duration: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_break_duration(mut self, duration: Duration) -> Self {
        self.break_duration = duration;
        self
    }
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Refusal to run a call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Rejected {
    pub(crate) retry_after: Duration,
}

pub(crate) struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    events: Option<broadcast::Sender<PolicyEvent>>,
    /// Metrics: times the circuit opened
    open_count: AtomicU64,
    /// Metrics: calls refused
    rejected_count: AtomicU64,
}

impl CircuitBreaker {
    pub(crate) fn new(
        name: &'static str,
        config: CircuitBreakerConfig,
        events: Option<broadcast::Sender<PolicyEvent>>,
    ) -> Self {
        Self {
            name,
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            events,
            open_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    pub(crate) fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    pub(crate) fn open_count(&self) -> u64 {
        self.open_count.load(Ordering::Relaxed)
    }

    pub(crate) fn rejected_count(&self) -> u64 {
        self.rejected_count.load(Ordering::Relaxed)
    }

    /// Ask to run one call.
    pub(crate) fn try_acquire(&self) -> Result<Permit<'_>, Rejected> {
        let mut state = self.state.lock();
        let current = state.state;

        match current {
            CircuitState::Closed => Ok(Permit::new(self, false)),

            CircuitState::Open => {
                let elapsed = state.opened_at.map_or(self.config.break_duration, |t| t.elapsed());
                if elapsed >= self.config.break_duration {
                    state.state = CircuitState::HalfOpen;
                    state.probe_in_flight = true;
                    drop(state);
                    self.transitioned(CircuitState::Open, CircuitState::HalfOpen);
                    Ok(Permit::new(self, true))
                } else {
                    let retry_after = self.config.break_duration - elapsed;
                    drop(state);
                    Err(self.rejected(CircuitState::Open, retry_after))
                }
            }

            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    drop(state);
                    Err(self.rejected(CircuitState::HalfOpen, Duration::ZERO))
                } else {
                    state.probe_in_flight = true;
                    Ok(Permit::new(self, true))
                }
            }
        }
    }

    fn on_success(&self, probe: bool) {
        let mut state = self.state.lock();
        let current = state.state;
        match current {
            CircuitState::Closed => state.consecutive_failures = 0,
            CircuitState::HalfOpen if probe => {
                state.state = CircuitState::Closed;
                state.consecutive_failures = 0;
                state.opened_at = None;
                state.probe_in_flight = false;
                drop(state);
                self.transitioned(CircuitState::HalfOpen, CircuitState::Closed);
            }
            // A call admitted before the circuit opened; it says nothing
            // about the probe.
            _ => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut state = self.state.lock();
        let current = state.state;
        match current {
            CircuitState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                    let failures = state.consecutive_failures;
                    drop(state);
                    self.open_count.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        policy = self.name,
                        failures,
                        break_ms = self.config.break_duration.as_millis() as u64,
                        "circuit breaker opened - too many failures"
                    );
                    self.transitioned(CircuitState::Closed, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if probe => {
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
                state.probe_in_flight = false;
                drop(state);
                self.open_count.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(policy = self.name, "circuit breaker re-opened - probe failed");
                self.transitioned(CircuitState::HalfOpen, CircuitState::Open);
            }
            _ => {}
        }
    }

    /// The probe ended without telling us anything about the dependency.
    fn release_probe(&self) {
        let mut state = self.state.lock();
        if state.state == CircuitState::HalfOpen {
            state.probe_in_flight = false;
        }
    }

    fn rejected(&self, state: CircuitState, retry_after: Duration) -> Rejected {
        self.rejected_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            policy = self.name,
            state = state.as_str(),
            retry_after_ms = retry_after.as_millis() as u64,
            "call rejected by circuit breaker"
        );
        self.notify(PolicyEvent::CallRejected {
            policy: self.name,
            state,
            retry_after,
        });
        Rejected { retry_after }
    }

    fn transitioned(&self, from: CircuitState, to: CircuitState) {
        tracing::info!(
            policy = self.name,
            from = from.as_str(),
            to = to.as_str(),
            "circuit breaker state changed"
        );
        self.notify(PolicyEvent::CircuitStateChanged {
            policy: self.name,
            from,
            to,
        });
    }

    pub(crate) fn notify(&self, event: PolicyEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Permission to run one guarded call.
pub(crate) struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    resolved: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            resolved: false,
        }
    }

    pub(crate) fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.probe);
    }

    /// The call failed transiently after all retries.
    pub(crate) fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.probe);
    }

    /// The call failed in a way that says nothing about the dependency's
    /// health.
    pub(crate) fn neutral(mut self) {
        self.resolved = true;
        if self.probe {
            self.breaker.release_probe();
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.probe {
            self.breaker.release_probe();
        }
    }
}
