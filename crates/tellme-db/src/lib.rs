//! Storage layer for the TellMe service.
//!
//! Resolves where the single-file SQLite store lives, builds the process-wide
//! connection handle (an `r2d2` pool), makes sure every registered table
//! exists, and hands out scoped sessions.
//!
//! # Design decisions
//!
//! - **One handle, passed explicitly**: [`Storage`] is built at startup and
//!   cloned into whatever needs it. Nothing reaches for a global.
//! - **One connection per session**: a [`Session`] owns its pooled connection
//!   for its whole life, so no connection is ever used by two requests at
//!   once. Connections are opened serialized by default as well.
//! - **Release on every path**: sessions release in `Drop`, rolling back any
//!   open transaction, so early returns, `?` and panics all clean up.
//! - **Schema-ensure, not migrations**: tables are created if missing and
//!   otherwise left exactly as they are.

mod error;
mod location;
mod pool;
mod schema;
mod session;

pub use error::DbError;
pub use location::{StorageLocation, DATABASE_PATH_ENV, DEFAULT_DATABASE_PATH};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, Storage, ThreadingMode};
pub use schema::{Metadata, Model, TableDef};
pub use session::{Session, SessionCounts};
