//! # skein-store
//!
//! Local index for skein threads, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for block metadata,
//! the thread registry (including each thread's head), thread membership and
//! the contact directory. Block bytes themselves live in the content store,
//! never here.

pub mod blocks;
pub mod contacts;
pub mod database;
pub mod migrations;
pub mod models;
pub mod peers;
pub mod threads;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;

#[cfg(test)]
pub(crate) mod testing {
    use chrono::Utc;
    use skein_shared::types::{PeerId, ThreadId, ThreadType};

    use crate::models::ThreadRecord;

    pub fn thread(id: &str) -> ThreadRecord {
        ThreadRecord {
            id: ThreadId::from(id),
            key: format!("key-{id}"),
            name: "photos".to_string(),
            thread_type: ThreadType::Open,
            schema: None,
            owner: PeerId([1u8; 32]),
            sk: [9u8; 32],
            head: None,
            created_at: Utc::now(),
        }
    }
}
