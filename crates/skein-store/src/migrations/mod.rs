//! Schema migrations for the index database.
//!
//! The schema version lives in SQLite's `user_version` pragma. Each entry of
//! [`MIGRATIONS`] upgrades from the version before it and runs inside a
//! transaction together with its version bump.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Migration = (&'static str, fn(&Connection) -> rusqlite::Result<()>);

/// In order. Entry `i` takes the schema to version `i + 1`.
const MIGRATIONS: &[Migration] = &[("v001_initial", v001_initial::up)];

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let current: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    let current = usize::try_from(current).unwrap_or(usize::MAX);
    if current > MIGRATIONS.len() {
        return Err(StoreError::Migration(format!(
            "index schema v{current} is newer than this build (v{})",
            MIGRATIONS.len()
        )));
    }

    for (version, (name, up)) in MIGRATIONS.iter().enumerate().skip(current) {
        tracing::info!(migration = name, "applying index migration");
        let tx = conn.transaction()?;
        let schema: &Connection = &tx;
        up(schema).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        tx.pragma_update(None, "user_version", version as i64 + 1)?;
        tx.commit()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();

        let version: i64 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version as usize, MIGRATIONS.len());
    }

    #[test]
    fn test_newer_schema_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", 99).unwrap();
        assert!(matches!(
            run_migrations(&mut conn),
            Err(StoreError::Migration(_))
        ));
    }
}
