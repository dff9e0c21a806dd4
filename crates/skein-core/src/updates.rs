//! Live feed of applied blocks.
//!
//! Every block a thread indexes is published once, tagged with its index
//! `seq`. Subscribers first replay what the index already holds after their
//! cursor, then follow the live broadcast; seq filtering stitches the two
//! together without duplicates. A subscriber that falls behind the broadcast
//! rereads the index from its cursor instead of losing updates.

use std::collections::VecDeque;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use skein_shared::protocol::BlockType;
use skein_shared::types::{BlockHash, PeerId, ThreadId};
use skein_store::BlockRecord;

use crate::error::Result;
use crate::index::Index;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ThreadUpdate {
    pub seq: i64,
    pub thread_id: ThreadId,
    pub block: BlockHash,
    pub block_type: BlockType,
    pub author: PeerId,
    pub parents: Vec<BlockHash>,
    pub date: u64,
    pub target: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<BlockRecord> for ThreadUpdate {
    fn from(r: BlockRecord) -> Self {
        Self {
            seq: r.seq,
            thread_id: r.thread_id,
            block: r.id,
            block_type: r.block_type,
            author: r.author,
            parents: r.parents,
            date: r.date,
            target: r.target,
            created_at: r.created_at,
        }
    }
}

pub type UpdateStream = Pin<Box<dyn Stream<Item = ThreadUpdate> + Send>>;

#[derive(Clone)]
pub struct UpdateHub {
    tx: broadcast::Sender<ThreadUpdate>,
}

impl UpdateHub {
    /// `capacity` updates may be buffered per subscriber before it lags.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, update: ThreadUpdate) {
        // No receivers is fine.
        let _ = self.tx.send(update);
    }

    /// Follow `thread_id` from `since`: everything already indexed after
    /// the cursor, then live updates.
    pub fn stream(&self, index: Index, thread_id: ThreadId, since: i64) -> Result<UpdateStream> {
        // Subscribe before reading so nothing lands between the two.
        let mut follow = Follow {
            live: self.tx.subscribe(),
            index,
            thread_id,
            cursor: since,
            pending: VecDeque::new(),
        };
        follow.catch_up()?;
        Ok(Box::pin(futures::stream::unfold(follow, |mut follow| async move {
            follow.next().await.map(|update| (update, follow))
        })))
    }
}

/// One subscriber's position in a thread.
struct Follow {
    live: broadcast::Receiver<ThreadUpdate>,
    index: Index,
    thread_id: ThreadId,
    /// Highest seq handed out.
    cursor: i64,
    /// Read from the index but not yet handed out.
    pending: VecDeque<ThreadUpdate>,
}

impl Follow {
    fn catch_up(&mut self) -> Result<()> {
        let after = self.pending.back().map_or(self.cursor, |u| u.seq);
        let records = self.index.blocks_since(&self.thread_id, after)?;
        self.pending.extend(records.into_iter().map(ThreadUpdate::from));
        Ok(())
    }

    async fn next(&mut self) -> Option<ThreadUpdate> {
        loop {
            if let Some(update) = self.pending.pop_front() {
                self.cursor = update.seq;
                return Some(update);
            }
            match self.live.recv().await {
                Ok(update) if update.thread_id == self.thread_id && update.seq > self.cursor => {
                    self.cursor = update.seq;
                    return Some(update);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(thread = %self.thread_id, skipped, cursor = self.cursor, "Update subscriber lagged, rereading index");
                    if let Err(e) = self.catch_up() {
                        warn!(thread = %self.thread_id, "Failed to reread updates: {}", e);
                        return None;
                    }
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
