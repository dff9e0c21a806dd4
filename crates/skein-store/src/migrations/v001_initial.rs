//! v001 -- Initial schema creation.
//!
//! Creates the four index tables: `threads`, `blocks`, `thread_peers` and
//! `contacts`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Threads (registry + head pointer)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS threads (
    id          TEXT PRIMARY KEY NOT NULL,
    key         TEXT NOT NULL,               -- app key, locally unique
    name        TEXT NOT NULL,
    thread_type TEXT NOT NULL,               -- 'open' | 'private'
    schema      TEXT,                        -- content hash, nullable
    owner       TEXT NOT NULL,               -- hex-encoded peer id
    sk          TEXT NOT NULL,               -- hex-encoded 32-byte thread key
    head        TEXT,                        -- hex block hash, NULL when empty
    created_at  TEXT NOT NULL                -- RFC-3339
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_threads_key ON threads(key);

-- ----------------------------------------------------------------
-- Blocks (metadata only; bytes live in the content store)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS blocks (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT, -- local commit order
    id         TEXT NOT NULL UNIQUE,              -- hex block hash
    thread_id  TEXT NOT NULL,
    block_type TEXT NOT NULL,
    author     TEXT NOT NULL,                     -- hex peer id
    parents    TEXT NOT NULL,                     -- comma-separated hex hashes
    date       INTEGER NOT NULL,                  -- logical clock
    target     TEXT,
    created_at TEXT NOT NULL,

    FOREIGN KEY (thread_id) REFERENCES threads(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_blocks_thread_seq ON blocks(thread_id, seq);
CREATE INDEX IF NOT EXISTS idx_blocks_target ON blocks(target);

-- ----------------------------------------------------------------
-- Thread membership
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS thread_peers (
    thread_id TEXT NOT NULL,
    peer_id   TEXT NOT NULL,
    added_at  TEXT NOT NULL,

    PRIMARY KEY (thread_id, peer_id),
    FOREIGN KEY (thread_id) REFERENCES threads(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Contacts (last writer wins)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contacts (
    peer_id    TEXT PRIMARY KEY NOT NULL,
    username   TEXT NOT NULL,
    avatar     TEXT,
    inbox      TEXT,
    updated_at TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
