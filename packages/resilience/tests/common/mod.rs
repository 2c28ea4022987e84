use std::future::{Ready, ready};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use resilience::{Classify, FailureKind};

#[derive(Debug, Clone, thiserror::Error)]
pub enum TestError {
    #[error("service unavailable")]
    Unavailable,
    #[error("unauthorized")]
    Unauthorized,
}

impl Classify for TestError {
    fn classify(&self) -> FailureKind {
        match self {
            TestError::Unavailable => FailureKind::Transient,
            TestError::Unauthorized => FailureKind::Permanent,
        }
    }
}

/// An operation that fails a fixed number of times before succeeding.
#[derive(Clone)]
pub struct Flaky {
    calls: Arc<AtomicU32>,
    failures: u32,
    error: TestError,
}

impl Flaky {
    pub fn failing(failures: u32, error: TestError) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            failures,
            error,
        }
    }

    pub fn always(error: TestError) -> Self {
        Self::failing(u32::MAX, error)
    }

    pub fn ok() -> Self {
        Self::failing(0, TestError::Unavailable)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call(&self) -> Ready<Result<u32, TestError>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let result = if n < self.failures {
            Err(self.error.clone())
        } else {
            Ok(n + 1)
        };
        ready(result)
    }
}
