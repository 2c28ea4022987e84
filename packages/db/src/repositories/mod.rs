//! Repository implementations for database operations.

mod outbox_repo;
mod user_repo;
mod watchlist_repo;

pub use outbox_repo::{
    NewOutboxEntry, OutboxEntry, OutboxRepository, STATUS_DISPATCHED, STATUS_PENDING,
};
pub use user_repo::UserRepository;
pub use watchlist_repo::WatchlistRepository;
