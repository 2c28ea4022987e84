#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use flick_core::UserId;
use messaging::{CapabilityError, ConsumerEvent, Disposition, EnsureCreated, ScopeFactory};
use parking_lot::Mutex;
use tokio::sync::broadcast;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Store {
    created: Mutex<HashSet<UserId>>,
    calls: AtomicU32,
    failures_left: AtomicU32,
}

/// Scope factory over an in-memory set of created users.
#[derive(Clone, Default)]
pub struct RecordingScopes {
    store: Arc<Store>,
}

impl RecordingScopes {
    /// Every call fails until `failures` calls have been made.
    pub fn failing(failures: u32) -> Self {
        let scopes = Self::default();
        scopes.store.failures_left.store(failures, Ordering::SeqCst);
        scopes
    }

    pub fn always_failing() -> Self {
        Self::failing(u32::MAX)
    }

    pub fn created(&self) -> HashSet<UserId> {
        self.store.created.lock().clone()
    }

    pub fn calls(&self) -> u32 {
        self.store.calls.load(Ordering::SeqCst)
    }
}

pub struct RecordingScope {
    store: Arc<Store>,
}

impl EnsureCreated for RecordingScope {
    async fn ensure_created(&self, user_id: UserId) -> Result<(), CapabilityError> {
        self.store.calls.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .store
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CapabilityError::new("store unavailable"));
        }

        self.store.created.lock().insert(user_id);
        Ok(())
    }
}

impl ScopeFactory for RecordingScopes {
    type Scope = RecordingScope;

    fn create_scope(&self) -> RecordingScope {
        RecordingScope {
            store: self.store.clone(),
        }
    }
}

/// The next `Handled` event, skipping lifecycle events.
pub async fn next_handled(
    rx: &mut broadcast::Receiver<ConsumerEvent>,
) -> (Disposition, Option<UserId>, u32) {
    loop {
        match tokio::time::timeout(EVENT_TIMEOUT, rx.recv()).await {
            Ok(Ok(ConsumerEvent::Handled {
                disposition,
                user_id,
                delivery_count,
            })) => return (disposition, user_id, delivery_count),
            Ok(Ok(_)) => continue,
            other => panic!("expected a handled event, got {:?}", other),
        }
    }
}

/// Wait for a specific lifecycle event.
pub async fn wait_for(rx: &mut broadcast::Receiver<ConsumerEvent>, expected: ConsumerEvent) {
    loop {
        match tokio::time::timeout(EVENT_TIMEOUT, rx.recv()).await {
            Ok(Ok(event)) if event == expected => return,
            Ok(Ok(_)) => continue,
            other => panic!("expected {:?}, got {:?}", expected, other),
        }
    }
}
