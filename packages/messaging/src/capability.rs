//! The downstream capability the consumer drives.

use std::error::Error;
use std::future::Future;
use std::sync::Arc;

use flick_core::UserId;

/// A failure inside the downstream capability.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CapabilityError {
    message: String,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl CapabilityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Idempotent "create if absent" keyed by user.
///
/// Calling it twice with the same id must leave the same state as calling
/// it once.
pub trait EnsureCreated: Send + Sync {
    fn ensure_created(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<(), CapabilityError>> + Send;
}

/// Hands out a fresh capability instance for each delivered message.
pub trait ScopeFactory: Send + Sync + 'static {
    type Scope: EnsureCreated + Send + 'static;

    fn create_scope(&self) -> Self::Scope;
}

impl<T: ScopeFactory> ScopeFactory for Arc<T> {
    type Scope = T::Scope;

    fn create_scope(&self) -> Self::Scope {
        (**self).create_scope()
    }
}
