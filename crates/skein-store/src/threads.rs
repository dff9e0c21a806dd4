//! CRUD operations for [`ThreadRecord`] rows, including the head pointer.

use rusqlite::{params, OptionalExtension};

use skein_shared::crypto;
use skein_shared::types::{BlockHash, ThreadId};

use crate::database::Database;
use crate::error::{conversion, parse_hash, parse_peer, parse_time, Result, StoreError};
use crate::models::ThreadRecord;

const THREAD_COLUMNS: &str =
    "id, key, name, thread_type, schema, owner, sk, head, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new thread.
    pub fn insert_thread(&self, thread: &ThreadRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO threads (id, key, name, thread_type, schema, owner, sk, head, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                thread.id.as_str(),
                thread.key,
                thread.name,
                thread.thread_type.as_str(),
                thread.schema,
                thread.owner.to_hex(),
                hex::encode(thread.sk),
                thread.head.map(|h| h.to_hex()),
                thread.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single thread by id.
    pub fn get_thread(&self, id: &ThreadId) -> Result<ThreadRecord> {
        self.conn()
            .query_row(
                &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?1"),
                params![id.as_str()],
                row_to_thread,
            )
            .map_err(StoreError::from_query)
    }

    /// Fetch a thread by its application key, if present.
    pub fn get_thread_by_key(&self, key: &str) -> Result<Option<ThreadRecord>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE key = ?1"),
                params![key],
                row_to_thread,
            )
            .optional()?)
    }

    /// List all threads, oldest first.
    pub fn list_threads(&self) -> Result<Vec<ThreadRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {THREAD_COLUMNS} FROM threads ORDER BY created_at ASC"
        ))?;

        let rows = stmt.query_map([], row_to_thread)?;

        let mut threads = Vec::new();
        for row in rows {
            threads.push(row?);
        }
        Ok(threads)
    }

    /// Current head of a thread.
    pub fn get_head(&self, id: &ThreadId) -> Result<Option<BlockHash>> {
        let head: Option<String> = self
            .conn()
            .query_row(
                "SELECT head FROM threads WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .map_err(StoreError::from_query)?;
        head.map(|h| parse_hash(0, &h))
            .transpose()
            .map_err(StoreError::Sqlite)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Point a thread's head at `head`.
    pub fn set_head(&self, id: &ThreadId, head: &BlockHash) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE threads SET head = ?2 WHERE id = ?1",
            params![id.as_str(), head.to_hex()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a thread with its block rows and membership.
    /// Returns `true` if a thread was deleted.
    pub fn delete_thread(&self, id: &ThreadId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM threads WHERE id = ?1", params![id.as_str()])?;
        Ok(affected > 0)
    }
}

/// Map a `rusqlite::Row` to a [`ThreadRecord`].
fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadRecord> {
    let id: String = row.get(0)?;
    let key: String = row.get(1)?;
    let name: String = row.get(2)?;
    let type_str: String = row.get(3)?;
    let schema: Option<String> = row.get(4)?;
    let owner_hex: String = row.get(5)?;
    let sk_hex: String = row.get(6)?;
    let head_hex: Option<String> = row.get(7)?;
    let created_str: String = row.get(8)?;

    let thread_type = type_str.parse().map_err(|e| conversion(3, e))?;
    let sk = crypto::key_from_hex(&sk_hex).map_err(|e| conversion(6, e))?;
    let head = head_hex.map(|h| parse_hash(7, &h)).transpose()?;

    Ok(ThreadRecord {
        id: ThreadId(id),
        key,
        name,
        thread_type,
        schema,
        owner: parse_peer(5, &owner_hex)?,
        sk,
        head,
        created_at: parse_time(8, &created_str)?,
    })
}
