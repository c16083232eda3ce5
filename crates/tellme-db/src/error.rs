//! Error types for the storage layer.

use thiserror::Error;

/// Errors raised while opening the store, ensuring schema, or running a session.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to build the pool or check out a connection.
    #[error("database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A SQLite statement failed.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Two registered models claim the same table with different definitions.
    #[error("conflicting definitions for table '{0}'")]
    ConflictingTable(String),

    /// Creating a table failed.
    #[error("failed to create table '{table}': {source}")]
    Schema {
        /// The table whose DDL failed.
        table: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },
}
