//! Block metadata rows. Keyed by block hash, so every write is idempotent.

use rusqlite::params;

use skein_shared::protocol::BlockType;
use skein_shared::types::{BlockHash, ThreadId};

use crate::database::Database;
use crate::error::{conversion, parse_hash, parse_peer, parse_time, Result, StoreError};
use crate::models::BlockRecord;

const BLOCK_COLUMNS: &str =
    "id, thread_id, block_type, author, parents, date, target, created_at, seq";

impl Database {
    /// Write or overwrite the row for `block.id`. An existing row keeps its
    /// original `seq`. Returns the row's `seq`.
    pub fn upsert_block(&self, block: &BlockRecord) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO blocks (id, thread_id, block_type, author, parents, date, target, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                thread_id  = excluded.thread_id,
                block_type = excluded.block_type,
                author     = excluded.author,
                parents    = excluded.parents,
                date       = excluded.date,
                target     = excluded.target",
            params![
                block.id.to_hex(),
                block.thread_id.as_str(),
                block.block_type.as_str(),
                block.author.to_hex(),
                encode_parents(&block.parents),
                block.date as i64,
                block.target,
                block.created_at.to_rfc3339(),
            ],
        )?;

        let seq = self.conn().query_row(
            "SELECT seq FROM blocks WHERE id = ?1",
            params![block.id.to_hex()],
            |row| row.get(0),
        )?;
        Ok(seq)
    }

    /// Fetch a block row by hash.
    pub fn get_block(&self, id: &BlockHash) -> Result<BlockRecord> {
        self.conn()
            .query_row(
                &format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE id = ?1"),
                params![id.to_hex()],
                row_to_block,
            )
            .map_err(StoreError::from_query)
    }

    /// Whether a row exists for `id`.
    pub fn has_block(&self, id: &BlockHash) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM blocks WHERE id = ?1",
            params![id.to_hex()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Blocks of a thread, newest first.
    pub fn list_blocks(
        &self,
        thread_id: &ThreadId,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<BlockRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks
             WHERE thread_id = ?1
             ORDER BY seq DESC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(params![thread_id.as_str(), limit, offset], row_to_block)?;

        let mut blocks = Vec::new();
        for row in rows {
            blocks.push(row?);
        }
        Ok(blocks)
    }

    /// Blocks of a thread written after `seq`, in commit order.
    pub fn blocks_since(&self, thread_id: &ThreadId, seq: i64) -> Result<Vec<BlockRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks
             WHERE thread_id = ?1 AND seq > ?2
             ORDER BY seq ASC"
        ))?;

        let rows = stmt.query_map(params![thread_id.as_str(), seq], row_to_block)?;

        let mut blocks = Vec::new();
        for row in rows {
            blocks.push(row?);
        }
        Ok(blocks)
    }

    /// Hashes hidden by IGNORE blocks in a thread.
    pub fn ignored_targets(&self, thread_id: &ThreadId) -> Result<Vec<BlockHash>> {
        let mut stmt = self.conn().prepare(
            "SELECT target FROM blocks
             WHERE thread_id = ?1 AND block_type = ?2 AND target IS NOT NULL",
        )?;

        let rows = stmt.query_map(
            params![thread_id.as_str(), BlockType::Ignore.as_str()],
            |row| {
                let target: String = row.get(0)?;
                parse_hash(0, &target)
            },
        )?;

        let mut targets = Vec::new();
        for row in rows {
            targets.push(row?);
        }
        Ok(targets)
    }

    /// Number of indexed blocks in a thread.
    pub fn count_blocks(&self, thread_id: &ThreadId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM blocks WHERE thread_id = ?1",
            params![thread_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn encode_parents(parents: &[BlockHash]) -> String {
    parents
        .iter()
        .map(|p| p.to_hex())
        .collect::<Vec<_>>()
        .join(",")
}

fn row_to_block(row: &rusqlite::Row<'_>) -> rusqlite::Result<BlockRecord> {
    let id_hex: String = row.get(0)?;
    let thread_id: String = row.get(1)?;
    let type_str: String = row.get(2)?;
    let author_hex: String = row.get(3)?;
    let parents_str: String = row.get(4)?;
    let date: i64 = row.get(5)?;
    let target: Option<String> = row.get(6)?;
    let created_str: String = row.get(7)?;
    let seq: i64 = row.get(8)?;

    let block_type: BlockType = type_str.parse().map_err(|e| conversion(2, e))?;
    let parents = parents_str
        .split(',')
        .filter(|p| !p.is_empty())
        .map(|p| parse_hash(4, p))
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(BlockRecord {
        id: parse_hash(0, &id_hex)?,
        thread_id: ThreadId(thread_id),
        block_type,
        author: parse_peer(3, &author_hex)?,
        parents,
        date: date as u64,
        target,
        created_at: parse_time(7, &created_str)?,
        seq,
    })
}
