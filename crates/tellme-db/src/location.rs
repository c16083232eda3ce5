//! Resolution of the on-disk database location.

use std::path::{Path, PathBuf};

/// Environment variable that overrides the database file path.
pub const DATABASE_PATH_ENV: &str = "DATABASE_PATH";

/// Database file used when no override is present.
pub const DEFAULT_DATABASE_PATH: &str = "/app/data/database.db";

/// Where the single-file store lives.
///
/// No existence or writability check happens here; a bad path surfaces as an
/// I/O error when the store is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    path: PathBuf,
}

impl StorageLocation {
    /// Wraps an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The location named by [`DATABASE_PATH_ENV`] through `lookup`, if any.
    /// Blank values count as unset.
    pub fn from_override<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup(DATABASE_PATH_ENV)
            .filter(|value| !value.trim().is_empty())
            .map(Self::new)
    }

    /// Resolves the location through `lookup`, falling back to
    /// [`DEFAULT_DATABASE_PATH`].
    pub fn resolve_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_override(lookup).unwrap_or_default()
    }

    /// The resolved file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Connection string derived from the path, `sqlite:///{path}`.
    ///
    /// The path is interpolated as-is.
    pub fn database_url(&self) -> String {
        format!("sqlite:///{}", self.path.display())
    }
}

impl Default for StorageLocation {
    fn default() -> Self {
        Self::new(DEFAULT_DATABASE_PATH)
    }
}
