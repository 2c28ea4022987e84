//! Outbox repository.
//!
//! Rows are written in the same transaction as the state change they
//! announce (see [`UserRepository::create_with_outbox`]) and later drained by
//! a relay that publishes them and marks them dispatched.
//!
//! [`UserRepository::create_with_outbox`]: super::UserRepository::create_with_outbox

use chrono::{DateTime, Utc};
use flick_core::DomainEvent;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{Database, DbError};

/// Status of a row that still needs publishing.
pub const STATUS_PENDING: &str = "pending";
/// Status of a row that has been handed to the broker.
pub const STATUS_DISPATCHED: &str = "dispatched";

/// An event waiting in the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    pub id: Ulid,
    pub event_type: String,
    /// Encoded event, exactly as it goes on the wire.
    pub body: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OutboxEntry {
    /// Decode the stored body.
    pub fn event(&self) -> Result<DomainEvent, flick_core::DecodeError> {
        DomainEvent::decode(self.body.as_bytes())
    }
}

/// Data for a new outbox row.
#[derive(Debug, Clone)]
pub struct NewOutboxEntry {
    pub id: Ulid,
    pub event_type: String,
    pub body: String,
}

impl NewOutboxEntry {
    /// Encode an event for the outbox.
    pub fn from_event(event: &DomainEvent) -> Result<Self, DbError> {
        let body = serde_json::to_string(event)
            .map_err(|e| DbError::Serialization(e.to_string()))?;
        Ok(Self {
            id: Ulid::new(),
            event_type: event.event_type().as_str().to_string(),
            body,
        })
    }
}

/// Struct for creating rows - omits status and datetime fields to use SurrealDB defaults.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct OutboxCreate {
    pub(crate) event_type: String,
    pub(crate) body: String,
}

impl From<&NewOutboxEntry> for OutboxCreate {
    fn from(entry: &NewOutboxEntry) -> Self {
        Self {
            event_type: entry.event_type.clone(),
            body: entry.body.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OutboxRecord {
    entry_id: String,
    event_type: String,
    body: String,
    attempts: i64,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl OutboxRecord {
    fn into_entry(self) -> Result<OutboxEntry, DbError> {
        let id = Ulid::from_string(&self.entry_id).map_err(|e| {
            DbError::Serialization(format!("bad outbox id {}: {}", self.entry_id, e))
        })?;
        Ok(OutboxEntry {
            id,
            event_type: self.event_type,
            body: self.body,
            attempts: self.attempts.clamp(0, u32::MAX as i64) as u32,
            last_error: self.last_error,
            created_at: self.created_at,
        })
    }
}

const ENTRY_FIELDS: &str =
    "meta::id(id) AS entry_id, event_type, body, attempts, last_error, created_at";

/// Repository for outbox persistence operations.
#[derive(Clone)]
pub struct OutboxRepository {
    db: Database,
}

impl OutboxRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Enqueue an event on its own, outside any other write.
    pub async fn insert(&self, entry: &NewOutboxEntry) -> Result<OutboxEntry, DbError> {
        let mut result = self
            .db
            .query(format!(
                "CREATE type::thing('outbox', $id) CONTENT $content RETURN {}",
                ENTRY_FIELDS
            ))
            .bind(("id", entry.id.to_string()))
            .bind(("content", OutboxCreate::from(entry)))
            .await?;

        let record: Option<OutboxRecord> = result.take(0)?;
        record
            .ok_or_else(|| DbError::Query("Failed to create outbox entry".to_string()))?
            .into_entry()
    }

    /// Get an entry by ID.
    pub async fn get(&self, id: Ulid) -> Result<OutboxEntry, DbError> {
        let mut result = self
            .db
            .query(format!(
                "SELECT {} FROM type::thing('outbox', $id)",
                ENTRY_FIELDS
            ))
            .bind(("id", id.to_string()))
            .await?;

        let record: Option<OutboxRecord> = result.take(0)?;
        record
            .ok_or_else(|| DbError::NotFound(format!("Outbox entry not found: {}", id)))?
            .into_entry()
    }

    /// Pending entries, oldest first.
    pub async fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>, DbError> {
        let mut result = self
            .db
            .query(format!(
                "SELECT {} FROM outbox WHERE status = $status ORDER BY created_at ASC, entry_id ASC LIMIT $limit",
                ENTRY_FIELDS
            ))
            .bind(("status", STATUS_PENDING))
            .bind(("limit", limit as i64))
            .await?;

        let records: Vec<OutboxRecord> = result.take(0)?;
        records.into_iter().map(OutboxRecord::into_entry).collect()
    }

    /// Mark an entry as handed to the broker.
    pub async fn mark_dispatched(&self, id: Ulid) -> Result<(), DbError> {
        self.db
            .query(
                "UPDATE type::thing('outbox', $id) \
                 SET status = $status, dispatched_at = time::now()",
            )
            .bind(("id", id.to_string()))
            .bind(("status", STATUS_DISPATCHED))
            .await?
            .check()?;
        Ok(())
    }

    /// Record a failed publish attempt; the entry stays pending.
    pub async fn record_failure(&self, id: Ulid, error: &str) -> Result<(), DbError> {
        self.db
            .query("UPDATE type::thing('outbox', $id) SET attempts += 1, last_error = $error")
            .bind(("id", id.to_string()))
            .bind(("error", error.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    /// Number of entries still waiting.
    pub async fn count_pending(&self) -> Result<u64, DbError> {
        let mut result = self
            .db
            .query("SELECT count() FROM outbox WHERE status = $status GROUP ALL")
            .bind(("status", STATUS_PENDING))
            .await?;

        #[derive(Deserialize)]
        struct CountResult {
            count: i64,
        }

        let counts: Vec<CountResult> = result.take(0)?;
        Ok(counts.first().map_or(0, |c| c.count.max(0) as u64))
    }
}
