//! SurrealDB integration for the FlickBinge services.
//!
//! This crate provides database connectivity and repositories for
//! persisting users, watchlists and the event outbox.
//!
//! Connections are explicit handles: every caller gets its own `Database`
//! from [`init`] and passes it to the repositories it builds. With the
//! in-memory engine each handle is an independent datastore.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, connect};
pub use schema::init_schema;

/// Connect and initialize the schema.
///
/// This should be called once per service at startup.
pub async fn init(config: DbConfig) -> Result<Database, DbError> {
    let db = connect(&config).await?;
    init_schema(&db).await?;
    Ok(db)
}
