//! Policy notifications for observers.

use std::time::Duration;

use crate::CircuitState;

/// Emitted by a policy as calls flow through it.
///
/// Delivered over an optional broadcast channel in addition to `tracing`.
/// Sending never blocks and a missing or lagging receiver is ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyEvent {
    /// A transient failure will be retried after `delay`.
    RetryScheduled {
        policy: &'static str,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// The breaker moved between states.
    CircuitStateChanged {
        policy: &'static str,
        from: CircuitState,
        to: CircuitState,
    },
    /// A call was refused without running the operation.
    CallRejected {
        policy: &'static str,
        state: CircuitState,
        retry_after: Duration,
    },
}

impl PolicyEvent {
    pub fn policy(&self) -> &'static str {
        match self {
            PolicyEvent::RetryScheduled { policy, .. }
            | PolicyEvent::CircuitStateChanged { policy, .. }
            | PolicyEvent::CallRejected { policy, .. } => policy,
        }
    }
}
