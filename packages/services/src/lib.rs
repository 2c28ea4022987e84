//! Service layer for FlickBinge.
//!
//! - `movies` - movie lookup against the OMDb API, behind a resilience policy
//! - `recommendations` - chat-completion client and recommendation service
//! - `watchlist` - the watchlist capability the event consumer drives
//! - `users` - user registration, writing the user and its event atomically
//! - `outbox` - relay publishing outbox rows to the broker

pub mod movies;
pub mod outbox;
pub mod recommendations;
pub mod users;
pub mod watchlist;

pub use movies::{MovieClient, MovieLookupError, OmdbConfig};
pub use outbox::{DrainReport, OutboxRelay, RelayConfig, RelayHandle};
pub use recommendations::{
    CompletionClient, CompletionConfig, CompletionError, RecommendationService,
};
pub use users::{RegistrationError, UserService};
pub use watchlist::{WatchlistScopeFactory, WatchlistService};
