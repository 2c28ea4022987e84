//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes. Every statement is
/// `IF NOT EXISTS`, so running it against an initialized database is a no-op.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    // User table (producer side)
    db.query(USER_SCHEMA).await?.check()?;

    // Watchlist tables (consumer side)
    db.query(WATCHLIST_SCHEMA).await?.check()?;
    db.query(WATCHLIST_ITEM_SCHEMA).await?.check()?;

    // Outbox of events awaiting publication
    db.query(OUTBOX_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// User table schema.
const USER_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS user SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS username ON user TYPE string;
DEFINE FIELD IF NOT EXISTS email ON user TYPE string;
DEFINE FIELD IF NOT EXISTS created_at ON user TYPE datetime DEFAULT time::now();

DEFINE INDEX IF NOT EXISTS user_username ON user FIELDS username UNIQUE;
DEFINE INDEX IF NOT EXISTS user_email ON user FIELDS email UNIQUE;
"#;

/// Watchlist table schema. The record key is the user id.
const WATCHLIST_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS watchlist SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS user_id ON watchlist TYPE string;
DEFINE FIELD IF NOT EXISTS created_at ON watchlist TYPE datetime DEFAULT time::now();

-- One watchlist per user, even if two creators race
DEFINE INDEX IF NOT EXISTS watchlist_user ON watchlist FIELDS user_id UNIQUE;
"#;

/// Watchlist item table schema.
const WATCHLIST_ITEM_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS watchlist_item SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS user_id ON watchlist_item TYPE string;
DEFINE FIELD IF NOT EXISTS movie_title ON watchlist_item TYPE string;
DEFINE FIELD IF NOT EXISTS added_at ON watchlist_item TYPE datetime DEFAULT time::now();

DEFINE INDEX IF NOT EXISTS watchlist_item_user ON watchlist_item FIELDS user_id;
DEFINE INDEX IF NOT EXISTS watchlist_item_title ON watchlist_item FIELDS user_id, movie_title UNIQUE;
"#;

/// Outbox table schema.
const OUTBOX_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS outbox SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS event_type ON outbox TYPE string;
DEFINE FIELD IF NOT EXISTS body ON outbox TYPE string;
DEFINE FIELD IF NOT EXISTS status ON outbox TYPE string DEFAULT "pending";
DEFINE FIELD IF NOT EXISTS attempts ON outbox TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS last_error ON outbox TYPE option<string>;
DEFINE FIELD IF NOT EXISTS created_at ON outbox TYPE datetime DEFAULT time::now();
DEFINE FIELD IF NOT EXISTS dispatched_at ON outbox TYPE option<datetime>;

-- Relay polling (pending rows, oldest first)
DEFINE INDEX IF NOT EXISTS outbox_status ON outbox FIELDS status, created_at;
"#;
