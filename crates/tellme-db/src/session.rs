//! Scoped units of work over a pooled connection.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde::Serialize;

use crate::error::DbError;

/// Running totals of opened and released sessions.
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    opened: AtomicU64,
    released: AtomicU64,
}

impl SessionCounters {
    pub(crate) fn snapshot(&self) -> SessionCounts {
        SessionCounts {
            opened: self.opened.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time view of session bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionCounts {
    /// Sessions handed out so far.
    pub opened: u64,
    /// Sessions released so far.
    pub released: u64,
}

impl SessionCounts {
    /// Sessions currently held by callers.
    pub fn active(&self) -> u64 {
        self.opened.saturating_sub(self.released)
    }
}

/// One unit of work bound to one pooled connection.
///
/// A session is released exactly once: by [`Session::close`] or on drop,
/// including during unwinding. Release rolls back any transaction still open,
/// then the connection goes back to the pool.
pub struct Session {
    id: u64,
    conn: PooledConnection<SqliteConnectionManager>,
    counters: Arc<SessionCounters>,
    released: bool,
}

impl Session {
    /// Wraps a checked-out connection, discarding any transaction a previous
    /// holder failed to roll back.
    pub(crate) fn open(
        conn: PooledConnection<SqliteConnectionManager>,
        counters: Arc<SessionCounters>,
    ) -> Result<Self, DbError> {
        if !conn.is_autocommit() {
            tracing::warn!(
                "pooled connection checked out with an open transaction, rolling back"
            );
            conn.execute_batch("ROLLBACK")?;
        }

        let id = counters.opened.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(session = id, "session opened");
        Ok(Self {
            id,
            conn,
            counters,
            released: false,
        })
    }

    /// Sequence number of this session, starting at 1 per storage handle.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Fails if a transaction is already open.
    pub fn begin(&mut self) -> Result<(), DbError> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    /// Commits the open transaction.
    ///
    /// # Errors
    ///
    /// Fails if no transaction is open or the commit is rejected.
    pub fn commit(&mut self) -> Result<(), DbError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    /// Discards the open transaction.
    ///
    /// # Errors
    ///
    /// Fails if no transaction is open.
    pub fn rollback(&mut self) -> Result<(), DbError> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// Whether a transaction is open on this session.
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Releases the session now, reporting a failed rollback instead of only
    /// logging it.
    ///
    /// # Errors
    ///
    /// Returns the rollback error if an open transaction could not be discarded.
    pub fn close(mut self) -> Result<(), DbError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), DbError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let result = if self.in_transaction() {
            tracing::debug!(session = self.id, "rolling back uncommitted work");
            self.conn.execute_batch("ROLLBACK").map_err(DbError::from)
        } else {
            Ok(())
        };

        self.counters.released.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(session = self.id, "session released");
        result
    }
}

impl Deref for Session {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(session = self.id, error = %e, "failed to roll back session on release");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("in_transaction", &self.in_transaction())
            .field("released", &self.released)
            .finish()
    }
}
