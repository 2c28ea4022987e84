//! Core domain types shared by the FlickBinge services.
//!
//! This crate contains shared types used across all packages:
//! - `UserId` and `User` for the producing side
//! - `DomainEvent` and its wire codec for the broker
//! - `QueueSpec` describing the queue contract between producer and consumer
//! - `Watchlist`, `Movie` and recommendation types for the dependent services

mod events;
mod movie;
mod queue;
mod user;
mod watchlist;

pub use events::{DecodeError, DomainEvent, EventType};
pub use movie::{Movie, RecommendationRequest, RecommendationResult};
pub use queue::{QueueSpec, WATCHLIST_QUEUE};
pub use user::{User, UserId};
pub use watchlist::{Watchlist, WatchlistItem};
