//! Queue contract shared by producers and consumers.

use serde::{Deserialize, Serialize};

/// Name of the queue carrying user lifecycle events to the watchlist service.
pub const WATCHLIST_QUEUE: &str = "WatchlistQueue";

/// Declaration parameters for a named broker queue.
///
/// Producers and consumers declare the same spec; declaring an existing queue
/// with identical parameters is a no-op on the broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSpec {
    /// Queue name, used as the routing key on the default exchange.
    pub name: String,
    /// Survive a broker restart.
    pub durable: bool,
    /// Restrict the queue to the declaring connection.
    pub exclusive: bool,
    /// Delete the queue once its last consumer goes away.
    pub auto_delete: bool,
}

impl Default for QueueSpec {
    fn default() -> Self {
        Self::transient(WATCHLIST_QUEUE)
    }
}

impl QueueSpec {
    /// A non-durable, non-exclusive, non-auto-delete queue.
    pub fn transient(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: false,
            exclusive: false,
            auto_delete: false,
        }
    }
}

impl std::fmt::Display for QueueSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
