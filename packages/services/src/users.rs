//! User registration.

use std::sync::Arc;

use db::repositories::{NewOutboxEntry, UserRepository};
use db::{Database, DbError};
use flick_core::{DomainEvent, User, UserId};
use thiserror::Error;
use tokio::sync::Notify;

/// Why a registration was refused.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("invalid registration: {0}")]
    Invalid(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Db(DbError),
}

impl From<DbError> for RegistrationError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Conflict(msg) => RegistrationError::Conflict(msg),
            other => RegistrationError::Db(other),
        }
    }
}

/// Registers users and records their `UserCreated` event in the outbox.
///
/// The user row and the outbox row are written in one transaction; an
/// [`OutboxRelay`](crate::OutboxRelay) publishes the event afterwards.
#[derive(Clone)]
pub struct UserService {
    users: UserRepository,
    relay_nudge: Option<Arc<Notify>>,
}

impl UserService {
    pub fn new(db: Database) -> Self {
        Self {
            users: UserRepository::new(db),
            relay_nudge: None,
        }
    }

    /// Wake the relay after each registration instead of waiting for its
    /// next poll.
    pub fn with_relay_nudge(mut self, nudge: Arc<Notify>) -> Self {
        self.relay_nudge = Some(nudge);
        self
    }

    pub async fn register(&self, username: &str, email: &str) -> Result<User, RegistrationError> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() {
            return Err(RegistrationError::Invalid("username is required".to_string()));
        }
        if !email.contains('@') {
            return Err(RegistrationError::Invalid(format!(
                "not an email address: {}",
                email
            )));
        }

        let user = User::new(username, email);
        let event = DomainEvent::user_created(user.id);
        let entry = NewOutboxEntry::from_event(&event)?;

        let user = self.users.create_with_outbox(&user, &entry).await?;
        tracing::info!(user_id = %user.id, username = %user.username, "Registered user");

        if let Some(nudge) = &self.relay_nudge {
            nudge.notify_one();
        }
        Ok(user)
    }

    pub async fn get(&self, user_id: UserId) -> Result<User, DbError> {
        self.users.get(user_id).await
    }

    pub async fn count(&self) -> Result<u64, DbError> {
        self.users.count().await
    }
}
