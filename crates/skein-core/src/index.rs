//! Shared handle on the local SQLite index.
//!
//! Every call takes the connection lock for the duration of one synchronous
//! query; the lock is never held across an await point.

use std::path::Path;
use std::sync::{Arc, Mutex};

use skein_shared::types::{BlockHash, PeerId, ThreadId};
use skein_store::{BlockRecord, ContactRecord, Database, StoreError, ThreadRecord};

use crate::error::{Result, ThreadError};

#[derive(Clone)]
pub struct Index {
    db: Arc<Mutex<Database>>,
}

impl Index {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn with<T>(&self, f: impl FnOnce(&Database) -> skein_store::Result<T>) -> Result<T> {
        let db = self.db.lock().map_err(|_| ThreadError::IndexLock)?;
        Ok(f(&db)?)
    }

    // -- threads ------------------------------------------------------------

    pub fn insert_thread(&self, thread: &ThreadRecord) -> Result<()> {
        self.with(|db| db.insert_thread(thread))
    }

    pub fn thread(&self, id: &ThreadId) -> Result<ThreadRecord> {
        self.with(|db| db.get_thread(id)).map_err(|e| match e {
            ThreadError::Index(StoreError::NotFound) => ThreadError::ThreadNotFound(id.clone()),
            other => other,
        })
    }

    pub fn thread_by_key(&self, key: &str) -> Result<Option<ThreadRecord>> {
        self.with(|db| db.get_thread_by_key(key))
    }

    pub fn threads(&self) -> Result<Vec<ThreadRecord>> {
        self.with(|db| db.list_threads())
    }

    pub fn head(&self, id: &ThreadId) -> Result<Option<BlockHash>> {
        self.with(|db| db.get_head(id))
    }

    pub fn set_head(&self, id: &ThreadId, head: &BlockHash) -> Result<()> {
        self.with(|db| db.set_head(id, head))
    }

    pub fn delete_thread(&self, id: &ThreadId) -> Result<bool> {
        self.with(|db| db.delete_thread(id))
    }

    // -- blocks -------------------------------------------------------------

    pub fn upsert_block(&self, block: &BlockRecord) -> Result<i64> {
        self.with(|db| db.upsert_block(block))
    }

    pub fn block(&self, id: &BlockHash) -> Result<BlockRecord> {
        self.with(|db| db.get_block(id)).map_err(|e| match e {
            ThreadError::Index(StoreError::NotFound) => ThreadError::NotFound(*id),
            other => other,
        })
    }

    pub fn has_block(&self, id: &BlockHash) -> Result<bool> {
        self.with(|db| db.has_block(id))
    }

    pub fn blocks(&self, thread_id: &ThreadId, offset: u32, limit: u32) -> Result<Vec<BlockRecord>> {
        self.with(|db| db.list_blocks(thread_id, offset, limit))
    }

    pub fn blocks_since(&self, thread_id: &ThreadId, seq: i64) -> Result<Vec<BlockRecord>> {
        self.with(|db| db.blocks_since(thread_id, seq))
    }

    pub fn ignored_targets(&self, thread_id: &ThreadId) -> Result<Vec<BlockHash>> {
        self.with(|db| db.ignored_targets(thread_id))
    }

    pub fn count_blocks(&self, thread_id: &ThreadId) -> Result<u64> {
        self.with(|db| db.count_blocks(thread_id))
    }

    // -- membership ---------------------------------------------------------

    pub fn add_peer(&self, thread_id: &ThreadId, peer: &PeerId) -> Result<bool> {
        self.with(|db| db.add_thread_peer(thread_id, peer))
    }

    pub fn remove_peer(&self, thread_id: &ThreadId, peer: &PeerId) -> Result<bool> {
        self.with(|db| db.remove_thread_peer(thread_id, peer))
    }

    pub fn peers(&self, thread_id: &ThreadId) -> Result<Vec<PeerId>> {
        self.with(|db| db.list_thread_peers(thread_id))
    }

    // -- contacts -----------------------------------------------------------

    pub fn upsert_contact(&self, contact: &ContactRecord) -> Result<()> {
        self.with(|db| db.upsert_contact(contact))
    }

    /// `None` when the peer has never announced itself.
    pub fn contact(&self, peer: &PeerId) -> Result<Option<ContactRecord>> {
        match self.with(|db| db.get_contact(peer)) {
            Ok(c) => Ok(Some(c)),
            Err(ThreadError::Index(StoreError::NotFound)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn contacts(&self) -> Result<Vec<ContactRecord>> {
        self.with(|db| db.list_contacts())
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index").finish_non_exhaustive()
    }
}
