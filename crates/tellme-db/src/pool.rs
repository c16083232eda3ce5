//! Connection pool creation and the process-wide storage handle.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use serde::Deserialize;

use crate::error::DbError;
use crate::location::StorageLocation;
use crate::schema::{create_all, Metadata};
use crate::session::{Session, SessionCounters, SessionCounts};

/// How SQLite guards a connection against use from several threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThreadingMode {
    /// `SQLITE_OPEN_FULL_MUTEX`: every call on a connection is serialized.
    #[default]
    Serialized,
    /// `SQLITE_OPEN_NO_MUTEX`: the application guarantees a connection is
    /// never used by two threads at once.
    MultiThread,
}

impl ThreadingMode {
    fn open_flag(self) -> OpenFlags {
        match self {
            Self::Serialized => OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            Self::MultiThread => OpenFlags::SQLITE_OPEN_NO_MUTEX,
        }
    }
}

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,

    /// Mutex mode each connection is opened with.
    pub threading: ThreadingMode,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
            threading: ThreadingMode::default(),
        }
    }
}

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Creates a SQLite connection pool with WAL mode and foreign keys enabled.
///
/// The pool opens its connections eagerly, so the database file exists once
/// this returns.
///
/// # Errors
///
/// Returns `DbError::Sqlite` straight away if the file cannot be opened or
/// created, and `DbError::Pool` if the pool cannot be built.
pub fn create_pool(db_path: &Path, settings: DbRuntimeSettings) -> Result<DbPool, DbError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | settings.threading.open_flag();

    // r2d2 retries failed opens until its connection timeout; surface a bad
    // path as the open error instead.
    rusqlite::Connection::open_with_flags(db_path, flags)?;

    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(flags)
        .with_init(move |conn| {
            conn.execute_batch(&format!(
                "PRAGMA busy_timeout = {};",
                settings.busy_timeout_ms
            ))?;
            // In-memory databases report "memory", which is acceptable.
            let journal_mode: String =
                conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
            if journal_mode != "wal" && journal_mode != "memory" {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                    Some(format!(
                        "failed to set WAL journal mode, got: {}",
                        journal_mode
                    )),
                ));
            }
            conn.execute_batch("PRAGMA foreign_keys = ON;")
        });

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .build(manager)?;

    Ok(pool)
}

/// The process-wide connection handle.
///
/// Built once at startup and handed to whoever needs storage. Clones share the
/// same pool and session counters.
#[derive(Clone)]
pub struct Storage {
    pool: DbPool,
    location: StorageLocation,
    settings: DbRuntimeSettings,
    counters: Arc<SessionCounters>,
}

impl Storage {
    /// Opens the store at `location`.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Pool` if no connection to the file can be established.
    pub fn open(location: StorageLocation, settings: DbRuntimeSettings) -> Result<Self, DbError> {
        let pool = create_pool(location.path(), settings)?;

        tracing::info!(
            url = %location.database_url(),
            threading = ?settings.threading,
            pool_max_size = settings.pool_max_size,
            "opened database"
        );

        Ok(Self {
            pool,
            location,
            settings,
            counters: Arc::new(SessionCounters::default()),
        })
    }

    /// Where this handle points.
    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    /// The settings the pool was built with.
    pub fn settings(&self) -> DbRuntimeSettings {
        self.settings
    }

    /// Creates every table in `metadata` that does not exist yet.
    ///
    /// Existing tables are left untouched, so calling this repeatedly is safe.
    /// Returns the number of tables created by this call.
    ///
    /// # Errors
    ///
    /// Returns `DbError::ConflictingTable` if `metadata` defines one table two
    /// different ways, or `DbError::Schema` if a table cannot be created. In
    /// both cases nothing is created.
    pub fn ensure_schema(&self, metadata: &Metadata) -> Result<usize, DbError> {
        let conn = self.pool.get()?;
        create_all(&conn, metadata)
    }

    /// Opens a session bound to one pooled connection.
    ///
    /// The session is released when dropped or closed.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Pool` if no connection becomes available in time, or
    /// `DbError::Sqlite` if a leftover transaction on it cannot be discarded.
    pub fn session(&self) -> Result<Session, DbError> {
        let conn = self.pool.get()?;
        Session::open(conn, Arc::clone(&self.counters))
    }

    /// Runs `f` with a fresh session and releases it afterwards, whatever `f`
    /// returns.
    ///
    /// # Errors
    ///
    /// Propagates session acquisition errors and anything `f` returns.
    pub fn with_session<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Session) -> Result<T, E>,
        E: From<DbError>,
    {
        let mut session = self.session()?;
        f(&mut session)
    }

    /// Snapshot of session bookkeeping.
    pub fn session_counts(&self) -> SessionCounts {
        self.counters.snapshot()
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("location", &self.location)
            .field("settings", &self.settings)
            .field("sessions", &self.counters.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_file_pool_applies_settings() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let settings = DbRuntimeSettings {
            busy_timeout_ms: 2_500,
            pool_max_size: 3,
            threading: ThreadingMode::MultiThread,
        };

        let pool = create_pool(&dir.path().join("pool.db"), settings)
            .expect("pool creation should succeed");
        let conn = pool.get().expect("should get a connection");

        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .expect("should query journal_mode");
        assert_eq!(mode, "wal");

        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .expect("should query foreign_keys");
        assert_eq!(fk, 1, "foreign keys should be enabled");

        let busy_timeout: i32 = conn
            .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
            .expect("should query busy_timeout");
        assert_eq!(busy_timeout, 2_500, "busy timeout should match settings");

        assert_eq!(pool.max_size(), 3, "pool max size should match settings");
    }

    #[test]
    fn open_creates_database_file() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("created.db");
        assert!(!path.exists());

        let storage = Storage::open(StorageLocation::new(&path), DbRuntimeSettings::default())
            .expect("storage should open");

        assert!(path.exists(), "database file should exist after open");
        assert_eq!(storage.location().path(), path.as_path());
    }

    #[test]
    fn unopenable_path_fails_fast() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("missing_dir").join("app.db");

        let started = std::time::Instant::now();
        let err = Storage::open(StorageLocation::new(&path), DbRuntimeSettings::default())
            .expect_err("opening under a missing directory should fail");

        assert!(matches!(err, DbError::Sqlite(_)), "unexpected error: {err:?}");
        assert!(
            started.elapsed() < std::time::Duration::from_secs(5),
            "open error should not wait for the pool timeout"
        );
        assert!(!path.exists());
    }
}
