//! User repository.

use chrono::{DateTime, Utc};
use flick_core::{User, UserId};
use serde::{Deserialize, Serialize};

use super::outbox_repo::{NewOutboxEntry, OutboxCreate};
use crate::{Database, DbError};

/// Repository for user persistence operations.
#[derive(Clone)]
pub struct UserRepository {
    db: Database,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    user_id: String,
    username: String,
    email: String,
    created_at: DateTime<Utc>,
}

impl UserRecord {
    fn into_user(self) -> Result<User, DbError> {
        let id = UserId::parse(&self.user_id)
            .map_err(|e| DbError::Serialization(format!("bad user id {}: {}", self.user_id, e)))?;
        Ok(User {
            id,
            username: self.username,
            email: self.email,
            created_at: self.created_at,
        })
    }
}

/// Struct for creating users - omits datetime fields to use SurrealDB defaults.
#[derive(Debug, Clone, Serialize)]
struct UserCreate {
    username: String,
    email: String,
}

const USER_FIELDS: &str = "meta::id(id) AS user_id, username, email, created_at";

/// Unique index violations surface as plain query errors.
fn is_unique_violation(err: &surrealdb::Error) -> bool {
    let msg = err.to_string();
    msg.contains("already contains") || msg.contains("already exists")
}

impl UserRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a user and its outbox entry atomically.
    ///
    /// Either both rows are written or neither is. A duplicate id, username
    /// or email fails with [`DbError::Conflict`].
    pub async fn create_with_outbox(
        &self,
        user: &User,
        entry: &NewOutboxEntry,
    ) -> Result<User, DbError> {
        if self.find_conflict(&user.username, &user.email).await? {
            return Err(DbError::Conflict(format!(
                "User {} or {} already registered",
                user.username, user.email
            )));
        }

        let response = self
            .db
            .query(
                r#"
                BEGIN TRANSACTION;
                CREATE type::thing('user', $user_id) CONTENT $user;
                CREATE type::thing('outbox', $outbox_id) CONTENT $outbox;
                COMMIT TRANSACTION;
                "#,
            )
            .bind(("user_id", user.id.to_string()))
            .bind((
                "user",
                UserCreate {
                    username: user.username.clone(),
                    email: user.email.clone(),
                },
            ))
            .bind(("outbox_id", entry.id.to_string()))
            .bind(("outbox", OutboxCreate::from(entry)))
            .await?;

        if let Err(e) = response.check() {
            if is_unique_violation(&e) {
                return Err(DbError::Conflict(format!("User {} already exists", user.id)));
            }
            return Err(e.into());
        }

        tracing::debug!("Created user {} with outbox entry {}", user.id, entry.id);
        self.get(user.id).await
    }

    /// Get a user by ID.
    pub async fn get(&self, id: UserId) -> Result<User, DbError> {
        let mut result = self
            .db
            .query(format!(
                "SELECT {} FROM type::thing('user', $id)",
                USER_FIELDS
            ))
            .bind(("id", id.to_string()))
            .await?;

        let record: Option<UserRecord> = result.take(0)?;
        record
            .ok_or_else(|| DbError::NotFound(format!("User not found: {}", id)))?
            .into_user()
    }

    /// Find a user by username.
    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, DbError> {
        let mut result = self
            .db
            .query(format!(
                "SELECT {} FROM user WHERE username = $username LIMIT 1",
                USER_FIELDS
            ))
            .bind(("username", username.to_string()))
            .await?;

        let record: Option<UserRecord> = result.take(0)?;
        record.map(UserRecord::into_user).transpose()
    }

    async fn find_conflict(&self, username: &str, email: &str) -> Result<bool, DbError> {
        let mut result = self
            .db
            .query(
                "SELECT count() FROM user WHERE username = $username OR email = $email GROUP ALL",
            )
            .bind(("username", username.to_string()))
            .bind(("email", email.to_string()))
            .await?;

        let counts: Vec<CountResult> = result.take(0)?;
        Ok(counts.first().is_some_and(|c| c.count > 0))
    }

    /// Total number of users.
    pub async fn count(&self) -> Result<u64, DbError> {
        let mut result = self.db.query("SELECT count() FROM user GROUP ALL").await?;
        let counts: Vec<CountResult> = result.take(0)?;
        Ok(counts.first().map_or(0, |c| c.count.max(0) as u64))
    }
}

#[derive(Deserialize)]
struct CountResult {
    count: i64,
}
