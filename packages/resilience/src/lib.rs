//! Resiliency policies for outbound calls.
//!
//! A [`ResiliencePolicy`] runs an asynchronous operation with retry and
//! exponential backoff, wrapped in a circuit breaker. Retries happen inside a
//! single circuit-guarded call, so the breaker counts one failure per call
//! whose retries were exhausted, not one per attempt.
//!
//! Policies are typed by their call-site. Each protected dependency gets its
//! own instance with its own breaker state:
//!
//! ```ignore
//! use resilience::{MovieLookup, PolicyConfig, ResiliencePolicy};
//!
//! let policy = ResiliencePolicy::<MovieLookup>::new(PolicyConfig::default());
//! let movies = policy.execute(|| client.fetch()).await?;
//! ```
//!
//! Errors returned by the operation decide their own fate through
//! [`Classify`]: transient failures are retried and tracked by the breaker,
//! permanent ones propagate at once without touching the circuit.

mod circuit;
mod classify;
mod error;
mod events;
mod policy;
mod retry;

pub use circuit::{CircuitBreakerConfig, CircuitState};
pub use classify::{Classify, FailureKind, classify_status};
pub use error::PolicyError;
pub use events::PolicyEvent;
pub use policy::{CallSite, MovieLookup, PolicyConfig, Recommendation, ResiliencePolicy};
pub use retry::RetryConfig;
