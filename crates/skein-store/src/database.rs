//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::error::Result;
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "opening index database");

        let conn = Connection::open(path)?;

        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open a private in-memory database. Used by tests and throwaway nodes.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;

        // Run schema migrations.
        migrations::run_migrations(&mut conn)?;

        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return a mutable reference to the underlying connection.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn
            .path()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());

        // Reopening runs migrations again without error.
        drop(db);
        Database::open_at(&path).expect("should reopen");
    }

    #[test]
    fn open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.path().is_none());
    }
}
