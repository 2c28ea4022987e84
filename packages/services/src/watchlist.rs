//! Watchlist service: the capability `UserCreated` events are applied to.

use db::repositories::WatchlistRepository;
use db::{Database, DbError};
use flick_core::UserId;
use messaging::{CapabilityError, EnsureCreated, ScopeFactory};

/// Watchlist operations for one unit of work.
#[derive(Clone)]
pub struct WatchlistService {
    watchlists: WatchlistRepository,
}

impl WatchlistService {
    pub fn new(db: Database) -> Self {
        Self {
            watchlists: WatchlistRepository::new(db),
        }
    }

    /// Create the user's watchlist if it does not exist yet.
    ///
    /// Returns whether this call created it. Concurrent calls for the same
    /// user leave exactly one watchlist.
    pub async fn ensure_created(&self, user_id: UserId) -> Result<bool, DbError> {
        let created = self.watchlists.ensure_created(user_id).await?;
        if created {
            tracing::info!(user_id = %user_id, "Created watchlist");
        } else {
            tracing::debug!(user_id = %user_id, "Watchlist already exists");
        }
        Ok(created)
    }

    /// Add a title, creating the watchlist first if needed. Adding a title
    /// that is already on the list does nothing.
    pub async fn add_movie(&self, user_id: UserId, movie_title: &str) -> Result<bool, DbError> {
        self.watchlists.add_item(user_id, movie_title).await
    }

    /// Remove a title. Returns whether it was on the list.
    pub async fn remove_movie(&self, user_id: UserId, movie_title: &str) -> Result<bool, DbError> {
        self.watchlists.remove_item(user_id, movie_title).await
    }

    /// Titles on the user's watchlist, oldest first. Empty if there is no
    /// watchlist.
    pub async fn movies(&self, user_id: UserId) -> Result<Vec<String>, DbError> {
        match self.watchlists.get(user_id).await {
            Ok(watchlist) => Ok(watchlist.titles()),
            Err(DbError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    pub async fn count(&self) -> Result<u64, DbError> {
        self.watchlists.count().await
    }
}

impl EnsureCreated for WatchlistService {
    async fn ensure_created(&self, user_id: UserId) -> Result<(), CapabilityError> {
        WatchlistService::ensure_created(self, user_id)
            .await
            .map(|_| ())
            .map_err(|e| CapabilityError::with_source("failed to ensure watchlist", e))
    }
}

/// Hands each delivered message its own [`WatchlistService`].
#[derive(Clone)]
pub struct WatchlistScopeFactory {
    db: Database,
}

impl WatchlistScopeFactory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl ScopeFactory for WatchlistScopeFactory {
    type Scope = WatchlistService;

    fn create_scope(&self) -> WatchlistService {
        WatchlistService::new(self.db.clone())
    }
}
