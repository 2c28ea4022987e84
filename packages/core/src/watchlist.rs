//! Watchlist domain types owned by the watchlist service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::UserId;

/// A user's watchlist. There is at most one per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watchlist {
    pub user_id: UserId,
    pub items: Vec<WatchlistItem>,
    pub created_at: DateTime<Utc>,
}

impl Watchlist {
    /// Titles in the order they were added.
    pub fn titles(&self) -> Vec<String> {
        self.items.iter().map(|i| i.movie_title.clone()).collect()
    }
}

/// A single movie on a watchlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchlistItem {
    /// ULID, so items sort by insertion time.
    pub id: Ulid,
    pub movie_title: String,
    pub added_at: DateTime<Utc>,
}

impl WatchlistItem {
    pub fn new(movie_title: impl Into<String>) -> Self {
        Self {
            id: Ulid::new(),
            movie_title: movie_title.into(),
            added_at: Utc::now(),
        }
    }
}
