//! Failure classification.

/// How a failed call should be treated by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Likely to succeed on retry: network errors, timeouts, 5xx responses.
    Transient,
    /// Retrying won't help: validation, authentication, bad requests.
    Permanent,
}

/// Implemented by error types that can be run through a policy.
pub trait Classify {
    fn classify(&self) -> FailureKind;

    fn is_transient(&self) -> bool {
        self.classify() == FailureKind::Transient
    }
}

impl Classify for std::io::Error {
    fn classify(&self) -> FailureKind {
        use std::io::ErrorKind::*;
        match self.kind() {
            TimedOut | ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected
            | BrokenPipe | Interrupted | UnexpectedEof | WouldBlock => FailureKind::Transient,
            _ => FailureKind::Permanent,
        }
    }
}

impl Classify for tokio::time::error::Elapsed {
    fn classify(&self) -> FailureKind {
        FailureKind::Transient
    }
}

/// Classify an HTTP status code.
///
/// Server errors, request timeouts and rate limiting are transient.
pub fn classify_status(status: u16) -> FailureKind {
    match status {
        408 | 429 | 500..=599 => FailureKind::Transient,
        _ => FailureKind::Permanent,
    }
}
