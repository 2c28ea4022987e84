//! Consumer outcomes and notifications.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use flick_core::UserId;

/// What the consumer did with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Processed and acknowledged.
    Acked,
    /// Undecodable or of an unknown type; acknowledged without processing.
    Discarded,
    /// Downstream failed; returned to the queue.
    Requeued,
    /// Downstream kept failing; moved to the dead-letter queue.
    DeadLettered,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Acked => "acked",
            Disposition::Discarded => "discarded",
            Disposition::Requeued => "requeued",
            Disposition::DeadLettered => "dead_lettered",
        }
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broadcast by a running consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerEvent {
    /// Listening on `queue`.
    Started { queue: String },
    /// A delivery was settled.
    Handled {
        disposition: Disposition,
        /// `None` when the body could not be decoded.
        user_id: Option<UserId>,
        delivery_count: u32,
    },
    /// Channel and connection were released.
    Stopped { queue: String },
}

/// Counters shared between a consumer and its handle.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    acked: AtomicU64,
    discarded: AtomicU64,
    requeued: AtomicU64,
    dead_lettered: AtomicU64,
    settle_failures: AtomicU64,
    connection_lost: AtomicBool,
}

/// Point-in-time copy of [`ConsumerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStatsSnapshot {
    pub acked: u64,
    pub discarded: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    /// Acks or nacks the broker refused.
    pub settle_failures: u64,
}

impl ConsumerStats {
    pub(crate) fn record(&self, disposition: Disposition) {
        let counter = match disposition {
            Disposition::Acked => &self.acked,
            Disposition::Discarded => &self.discarded,
            Disposition::Requeued => &self.requeued,
            Disposition::DeadLettered => &self.dead_lettered,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_settle_failure(&self) {
        self.settle_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_connection_lost(&self) {
        self.connection_lost.store(true, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) -> bool {
        self.connection_lost.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            acked: self.acked.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            settle_failures: self.settle_failures.load(Ordering::Relaxed),
        }
    }
}
