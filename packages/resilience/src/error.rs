//! Typed policy failures.

use std::time::Duration;

use thiserror::Error;

/// Why a guarded call did not produce a value.
///
/// The policy never picks a fallback; callers match on this and decide.
#[derive(Debug, Error)]
pub enum PolicyError<E>
where
    E: std::error::Error + 'static,
{
    /// The breaker is open (or its single probe is already in flight).
    #[error("{policy}: circuit open, retry after {retry_after:?}")]
    CircuitOpen {
        policy: &'static str,
        retry_after: Duration,
    },

    /// Every attempt failed with a transient error.
    #[error("{policy}: gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        policy: &'static str,
        attempts: u32,
        source: E,
    },

    /// The operation failed with an error that retrying won't fix.
    #[error("{policy}: {source}")]
    Permanent { policy: &'static str, source: E },
}

impl<E> PolicyError<E>
where
    E: std::error::Error + 'static,
{
    /// Name of the policy that produced this failure.
    pub fn policy(&self) -> &'static str {
        match self {
            PolicyError::CircuitOpen { policy, .. }
            | PolicyError::RetriesExhausted { policy, .. }
            | PolicyError::Permanent { policy, .. } => policy,
        }
    }

    /// The last error returned by the operation, if it ran at all.
    pub fn inner(&self) -> Option<&E> {
        match self {
            PolicyError::CircuitOpen { .. } => None,
            PolicyError::RetriesExhausted { source, .. } | PolicyError::Permanent { source, .. } => {
                Some(source)
            }
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, PolicyError::CircuitOpen { .. })
    }
}
