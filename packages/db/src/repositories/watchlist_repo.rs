//! Watchlist repository.

use chrono::{DateTime, Utc};
use flick_core::{UserId, Watchlist, WatchlistItem};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{Database, DbError};

/// Repository for watchlist persistence operations.
#[derive(Clone)]
pub struct WatchlistRepository {
    db: Database,
}

/// Internal record type for SurrealDB reads.
#[derive(Debug, Deserialize)]
struct WatchlistRecord {
    created_at: DateTime<Utc>,
}

/// Struct for creating watchlists - omits datetime fields to use SurrealDB defaults.
#[derive(Debug, Clone, Serialize)]
struct WatchlistCreate {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct ItemRecord {
    item_id: String,
    movie_title: String,
    added_at: DateTime<Utc>,
}

impl ItemRecord {
    fn into_item(self) -> Result<WatchlistItem, DbError> {
        let id = Ulid::from_string(&self.item_id)
            .map_err(|e| DbError::Serialization(format!("bad item id {}: {}", self.item_id, e)))?;
        Ok(WatchlistItem {
            id,
            movie_title: self.movie_title,
            added_at: self.added_at,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct ItemCreate {
    user_id: String,
    movie_title: String,
}

impl WatchlistRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create the watchlist for `user_id` unless it already exists.
    ///
    /// Returns `true` if this call created it. Safe to call any number of
    /// times and from concurrent callers: the record key is the user id, so a
    /// losing racer's create fails and is resolved by re-reading.
    pub async fn ensure_created(&self, user_id: UserId) -> Result<bool, DbError> {
        if self.exists(user_id).await? {
            return Ok(false);
        }

        let key = user_id.to_string();
        let created: Result<Option<WatchlistRecord>, surrealdb::Error> = self
            .db
            .create(("watchlist", key.clone()))
            .content(WatchlistCreate { user_id: key })
            .await;

        match created {
            Ok(Some(_)) => {
                tracing::debug!("Created watchlist for user {}", user_id);
                Ok(true)
            }
            Ok(None) => Err(DbError::Query(format!(
                "Failed to create watchlist for user {}",
                user_id
            ))),
            Err(e) => {
                if self.exists(user_id).await? {
                    tracing::debug!("Watchlist for user {} created concurrently", user_id);
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    /// Check if a user has a watchlist.
    pub async fn exists(&self, user_id: UserId) -> Result<bool, DbError> {
        let record: Option<WatchlistRecord> = self
            .db
            .select(("watchlist", user_id.to_string()))
            .await?;
        Ok(record.is_some())
    }

    /// Load a watchlist with its items.
    pub async fn get(&self, user_id: UserId) -> Result<Watchlist, DbError> {
        let record: Option<WatchlistRecord> = self
            .db
            .select(("watchlist", user_id.to_string()))
            .await?;
        let record =
            record.ok_or_else(|| DbError::NotFound(format!("Watchlist not found: {}", user_id)))?;

        Ok(Watchlist {
            user_id,
            items: self.items(user_id).await?,
            created_at: record.created_at,
        })
    }

    /// Items on a user's watchlist, oldest first. Empty if there is no watchlist.
    pub async fn items(&self, user_id: UserId) -> Result<Vec<WatchlistItem>, DbError> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS item_id, movie_title, added_at FROM watchlist_item \
                 WHERE user_id = $user_id ORDER BY added_at ASC",
            )
            .bind(("user_id", user_id.to_string()))
            .await?;

        let records: Vec<ItemRecord> = result.take(0)?;
        records.into_iter().map(ItemRecord::into_item).collect()
    }

    /// Add a title, creating the watchlist first if needed.
    ///
    /// Returns `false` if the title was already on the list.
    pub async fn add_item(&self, user_id: UserId, movie_title: &str) -> Result<bool, DbError> {
        self.ensure_created(user_id).await?;

        if self.has_item(user_id, movie_title).await? {
            return Ok(false);
        }

        let item = WatchlistItem::new(movie_title);
        let created: Option<ItemRecord> = self
            .db
            .query(
                "CREATE type::thing('watchlist_item', $id) CONTENT $content \
                 RETURN meta::id(id) AS item_id, movie_title, added_at",
            )
            .bind(("id", item.id.to_string()))
            .bind((
                "content",
                ItemCreate {
                    user_id: user_id.to_string(),
                    movie_title: movie_title.to_string(),
                },
            ))
            .await?
            .take(0)?;

        created
            .map(|_| true)
            .ok_or_else(|| DbError::Query(format!("Failed to add {} to watchlist", movie_title)))
    }

    /// Remove a title. Returns `true` if something was removed.
    pub async fn remove_item(&self, user_id: UserId, movie_title: &str) -> Result<bool, DbError> {
        let mut result = self
            .db
            .query(
                "DELETE watchlist_item WHERE user_id = $user_id AND movie_title = $title \
                 RETURN BEFORE",
            )
            .bind(("user_id", user_id.to_string()))
            .bind(("title", movie_title.to_string()))
            .await?;

        let removed: Vec<serde_json::Value> = result.take(0)?;
        Ok(!removed.is_empty())
    }

    async fn has_item(&self, user_id: UserId, movie_title: &str) -> Result<bool, DbError> {
        let mut result = self
            .db
            .query(
                "SELECT count() FROM watchlist_item \
                 WHERE user_id = $user_id AND movie_title = $title GROUP ALL",
            )
            .bind(("user_id", user_id.to_string()))
            .bind(("title", movie_title.to_string()))
            .await?;

        let counts: Vec<CountResult> = result.take(0)?;
        Ok(counts.first().is_some_and(|c| c.count > 0))
    }

    /// Total number of watchlists.
    pub async fn count(&self) -> Result<u64, DbError> {
        let mut result = self
            .db
            .query("SELECT count() FROM watchlist GROUP ALL")
            .await?;
        let counts: Vec<CountResult> = result.take(0)?;
        Ok(counts.first().map_or(0, |c| c.count.max(0) as u64))
    }
}

#[derive(Deserialize)]
struct CountResult {
    count: i64,
}
