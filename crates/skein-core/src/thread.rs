//! One thread's append-only log.
//!
//! All head movement for a thread happens while holding its head lock, in a
//! fixed order: the block is stored, indexed, the head is swapped, and only
//! then is anything queued for peers. A crash between steps leaves at worst
//! an unreferenced stored object or an indexed block the head does not point
//! at yet.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use skein_shared::constants::MAX_DATE_SKEW;
use skein_shared::identity::Identity;
use skein_shared::protocol::{BlockHeader, BlockPayload, BlockType, ThreadBlock, ThreadSeed, WireMessage};
use skein_shared::types::{BlockHash, PeerId, ThreadId};
use skein_store::{BlockRecord, ThreadRecord};

use crate::error::{Result, ThreadError};
use crate::handlers::{Draft, HandlerContext, HandlerRegistry, IncomingBlock};
use crate::index::Index;
use crate::propagation::Propagator;
use crate::store::BlockStore;
use crate::updates::{ThreadUpdate, UpdateHub};

/// Everything threads of one node share.
pub struct Services {
    pub identity: Identity,
    pub store: Arc<dyn BlockStore>,
    pub index: Index,
    pub propagator: Arc<Propagator>,
    pub handlers: HandlerRegistry,
    pub updates: UpdateHub,
    /// Most ancestors fetched while resolving one incoming block.
    pub max_ancestor_depth: usize,
}

/// Proof that the caller holds a thread's head lock.
pub type HeadGuard<'a> = MutexGuard<'a, Option<BlockHash>>;

/// A block that made it into the content store.
#[derive(Debug, Clone)]
pub struct Committed {
    pub hash: BlockHash,
    pub header: BlockHeader,
    pub bytes: Vec<u8>,
}

/// What applying a remote block did to the thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The block became the head.
    Advanced,
    /// Histories diverged; a local merge of the old head and the block is
    /// the new head.
    Merged(BlockHash),
    /// Indexed without moving the head.
    Stored,
    /// Already indexed. Nothing changed.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeadPolicy {
    /// Advance or merge as needed.
    Reconcile,
    /// Only advance when the block directly extends the head. Used for
    /// fetched ancestors so a backfilled chain produces a single merge.
    FastForward,
}

pub struct Thread {
    record: ThreadRecord,
    head: Mutex<Option<BlockHash>>,
    services: Arc<Services>,
}

impl Thread {
    pub(crate) fn new(record: ThreadRecord, services: Arc<Services>) -> Self {
        Self {
            head: Mutex::new(record.head),
            record,
            services,
        }
    }

    pub fn id(&self) -> &ThreadId {
        &self.record.id
    }

    /// Thread metadata with the current head.
    pub async fn info(&self) -> ThreadRecord {
        let head = *self.head.lock().await;
        ThreadRecord {
            head,
            ..self.record.clone()
        }
    }

    pub async fn head(&self) -> Option<BlockHash> {
        *self.head.lock().await
    }

    /// Take the thread's exclusive lock.
    pub async fn lock(&self) -> HeadGuard<'_> {
        self.head.lock().await
    }

    /// Members we deliver to. Never includes this node.
    pub fn peers(&self) -> Result<Vec<PeerId>> {
        let local = self.local();
        Ok(self
            .services
            .index
            .peers(self.id())?
            .into_iter()
            .filter(|p| *p != local)
            .collect())
    }

    /// What an invitee needs to join.
    pub fn seed(&self) -> ThreadSeed {
        ThreadSeed {
            id: self.record.id.clone(),
            name: self.record.name.clone(),
            thread_type: self.record.thread_type,
            schema: self.record.schema.clone(),
            owner: self.record.owner,
            key: self.record.sk,
        }
    }

    fn local(&self) -> PeerId {
        self.services.identity.peer_id()
    }

    fn context(&self) -> HandlerContext<'_> {
        HandlerContext {
            thread: &self.record,
            local: self.local(),
            index: &self.services.index,
        }
    }

    /// Logical date for a block with these parents.
    fn next_date(&self, parents: &[BlockHash]) -> Result<u64> {
        let mut max = 0;
        for parent in parents {
            max = max.max(self.services.index.block(parent)?.date);
        }
        max.checked_add(1)
            .ok_or_else(|| ThreadError::InvalidBlock("logical clock exhausted".to_string()))
    }

    // -----------------------------------------------------------------------
    // Commit pipeline
    // -----------------------------------------------------------------------

    /// Seal `payload` on top of the current head (or `parents`, for merges)
    /// and put it in the content store. Touches neither the index nor the
    /// head.
    pub async fn commit(
        &self,
        head: &HeadGuard<'_>,
        payload: &BlockPayload,
        parents: Option<Vec<BlockHash>>,
    ) -> Result<Committed> {
        let parents = parents.unwrap_or_else(|| head.iter().copied().collect());
        let date = self.next_date(&parents)?;

        let block = ThreadBlock::seal(
            &self.services.identity,
            self.record.id.clone(),
            parents,
            date,
            &self.record.sk,
            payload,
        )
        .map_err(|e| ThreadError::Storage(format!("Failed to seal block: {e}")))?;
        let bytes = block
            .to_bytes()
            .map_err(|e| ThreadError::Storage(format!("Failed to encode block: {e}")))?;

        let hash = self.services.store.store(&bytes).await?;
        Ok(Committed {
            hash,
            header: block.header,
            bytes,
        })
    }

    /// Write the index row for a stored block and publish it to update
    /// subscribers. Idempotent.
    pub fn index_block(
        &self,
        _head: &HeadGuard<'_>,
        hash: BlockHash,
        header: &BlockHeader,
        target: Option<String>,
    ) -> Result<i64> {
        let mut record = BlockRecord {
            id: hash,
            thread_id: self.record.id.clone(),
            block_type: header.block_type,
            author: header.author,
            parents: header.parents.clone(),
            date: header.date,
            target,
            created_at: Utc::now(),
            seq: 0,
        };
        record.seq = self.services.index.upsert_block(&record)?;
        let seq = record.seq;
        self.services.updates.publish(ThreadUpdate::from(record));
        Ok(seq)
    }

    /// Persist and swap the head.
    pub fn update_head(&self, head: &mut HeadGuard<'_>, hash: BlockHash) -> Result<()> {
        self.services.index.set_head(self.id(), &hash)?;
        **head = Some(hash);
        Ok(())
    }

    /// Queue a committed block for every thread peer. Delivery itself runs
    /// on the per-peer workers, outside any thread lock.
    pub fn post(&self, committed: &Committed) {
        let wire = WireMessage::Block {
            thread_id: self.record.id.clone(),
            block: committed.bytes.clone(),
        };
        let data = match wire.to_bytes() {
            Ok(data) => data,
            Err(e) => {
                warn!(thread = %self.id(), "Failed to encode wire message: {}", e);
                return;
            }
        };
        let peers = match self.peers() {
            Ok(peers) => peers,
            Err(e) => {
                warn!(thread = %self.id(), "Failed to list peers: {}", e);
                return;
            }
        };

        for peer in peers {
            self.services.propagator.enqueue(peer, data.clone());
        }
    }

    /// Build, commit, index and post a locally authored block.
    pub async fn add_block(&self, draft: Draft) -> Result<BlockHash> {
        let block_type = draft.block_type();
        let handler = self.services.handlers.get(block_type)?;

        let mut head = self.lock().await;
        let payload = handler.build(&self.context(), draft)?;
        let committed = self.commit(&head, &payload, None).await?;
        self.index_block(&head, committed.hash, &committed.header, payload.target())?;
        self.update_head(&mut head, committed.hash)?;
        // Queued under the lock so each peer sees blocks in commit order.
        self.post(&committed);
        drop(head);

        info!(
            thread = %self.id(),
            hash = %committed.hash.short(),
            %block_type,
            "Added block"
        );
        Ok(committed.hash)
    }

    // -----------------------------------------------------------------------
    // Remote blocks
    // -----------------------------------------------------------------------

    /// Apply one remote block whose bytes hash to `hash`.
    pub async fn apply(&self, hash: BlockHash, bytes: &[u8]) -> Result<Applied> {
        self.apply_with(hash, bytes, HeadPolicy::Reconcile).await
    }

    /// Apply a remote block, fetching missing ancestors from the content
    /// store first. Gives up with `CausalGap` once more than the configured
    /// number of ancestors would be needed or an ancestor is unavailable.
    pub async fn receive(&self, hash: BlockHash, bytes: Vec<u8>) -> Result<Applied> {
        let mut pending = vec![(hash, bytes)];
        let mut fetched = 0usize;

        while let Some((h, b)) = pending.pop() {
            let policy = if pending.is_empty() {
                HeadPolicy::Reconcile
            } else {
                HeadPolicy::FastForward
            };

            match self.apply_with(h, &b, policy).await {
                Ok(applied) if pending.is_empty() => return Ok(applied),
                Ok(_) => {}
                Err(ThreadError::CausalGap { missing }) => {
                    pending.push((h, b));
                    for parent in &missing {
                        if fetched >= self.services.max_ancestor_depth {
                            warn!(
                                thread = %self.id(),
                                hash = %hash.short(),
                                fetched,
                                "Ancestor depth exceeded"
                            );
                            return Err(ThreadError::CausalGap {
                                missing: missing.clone(),
                            });
                        }
                        let data = match self.services.store.fetch(parent).await {
                            Ok(data) => data,
                            Err(ThreadError::NotFound(_)) => {
                                debug!(thread = %self.id(), missing = %parent.short(), "Ancestor unavailable");
                                return Err(ThreadError::CausalGap {
                                    missing: missing.clone(),
                                });
                            }
                            Err(e) => return Err(e),
                        };
                        fetched += 1;
                        pending.push((*parent, data));
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(ThreadError::CausalGap {
            missing: vec![hash],
        })
    }

    async fn apply_with(&self, hash: BlockHash, bytes: &[u8], policy: HeadPolicy) -> Result<Applied> {
        let (block, payload) = self.decode(hash, bytes)?;
        let header = &block.header;
        let index = &self.services.index;

        let mut head = self.lock().await;
        if index.has_block(&hash)? {
            return Ok(Applied::Duplicate);
        }

        let mut missing = Vec::new();
        for parent in &header.parents {
            match index.block(parent) {
                Ok(record) if record.thread_id == *self.id() => {}
                Ok(record) => {
                    return Err(ThreadError::Decode(format!(
                        "parent {} belongs to thread {}",
                        parent.short(),
                        record.thread_id
                    )))
                }
                Err(ThreadError::NotFound(_)) => missing.push(*parent),
                Err(e) => return Err(e),
            }
        }
        if !missing.is_empty() {
            return Err(ThreadError::CausalGap { missing });
        }
        let floor = self
            .next_date(&header.parents)
            .map_err(|e| ThreadError::Decode(e.to_string()))?;
        if header.date < floor || header.date - floor > MAX_DATE_SKEW {
            return Err(ThreadError::Decode(format!(
                "date {} does not follow its parents",
                header.date
            )));
        }

        // Durable before it can be indexed or become the head.
        self.services.store.store(bytes).await?;

        let handler = self.services.handlers.get(header.block_type)?;
        handler.apply(
            &self.context(),
            &IncomingBlock {
                hash,
                header,
                payload: &payload,
            },
        )?;
        self.index_block(&head, hash, header, payload.target())?;

        let applied = self.reconcile(&mut head, hash, header, policy).await?;
        drop(head);

        debug!(
            thread = %self.id(),
            hash = %hash.short(),
            block_type = %header.block_type,
            author = %header.author.short(),
            ?applied,
            "Applied block"
        );
        Ok(applied)
    }

    /// Decide where the head goes after indexing `hash`.
    async fn reconcile(
        &self,
        head: &mut HeadGuard<'_>,
        hash: BlockHash,
        header: &BlockHeader,
        policy: HeadPolicy,
    ) -> Result<Applied> {
        let current = match **head {
            None => {
                self.update_head(head, hash)?;
                return Ok(Applied::Advanced);
            }
            Some(current) => current,
        };

        if header.parents.contains(&current) {
            self.update_head(head, hash)?;
            return Ok(Applied::Advanced);
        }

        // Two peers merged the same pair of heads: keep the smaller hash so
        // both sides settle on one head without merging the merges.
        if header.block_type == BlockType::Merge && self.is_merge_of(&current, &header.parents)? {
            if hash < current {
                self.update_head(head, hash)?;
                return Ok(Applied::Advanced);
            }
            return Ok(Applied::Stored);
        }

        if policy == HeadPolicy::FastForward {
            return Ok(Applied::Stored);
        }

        let mut parents = vec![current, hash];
        parents.sort();
        let payload = self
            .services
            .handlers
            .get(BlockType::Merge)?
            .build(&self.context(), Draft::Merge)?;
        let merge = self.commit(head, &payload, Some(parents)).await?;
        self.index_block(head, merge.hash, &merge.header, None)?;
        self.update_head(head, merge.hash)?;
        self.post(&merge);

        info!(
            thread = %self.id(),
            merge = %merge.hash.short(),
            "Merged diverged heads"
        );
        Ok(Applied::Merged(merge.hash))
    }

    fn is_merge_of(&self, candidate: &BlockHash, parents: &[BlockHash]) -> Result<bool> {
        let record = self.services.index.block(candidate)?;
        if record.block_type != BlockType::Merge {
            return Ok(false);
        }
        let a: HashSet<_> = record.parents.iter().collect();
        let b: HashSet<_> = parents.iter().collect();
        Ok(a == b)
    }

    /// Check content address, envelope, signature, thread and payload.
    fn decode(&self, hash: BlockHash, bytes: &[u8]) -> Result<(ThreadBlock, BlockPayload)> {
        if BlockHash::of(bytes) != hash {
            return Err(ThreadError::Decode(format!(
                "content does not hash to {}",
                hash.short()
            )));
        }
        let block = ThreadBlock::from_bytes(bytes)
            .map_err(|e| ThreadError::Decode(format!("bad envelope: {e}")))?;
        if block.header.thread_id != self.record.id {
            return Err(ThreadError::Decode(format!(
                "block belongs to thread {}",
                block.header.thread_id
            )));
        }
        block
            .verify()
            .map_err(|e| ThreadError::UnknownAuthor(format!("{}: {}", block.header.author.short(), e)))?;
        let payload = block.open(&self.record.sk)?;

        let parents = &block.header.parents;
        let shape_ok = match block.header.block_type {
            BlockType::Merge => parents.len() == 2 && parents[0] != parents[1],
            _ => parents.len() <= 1,
        };
        if !shape_ok || block.header.date == 0 {
            return Err(ThreadError::Decode(format!(
                "malformed {} header",
                block.header.block_type
            )));
        }
        Ok((block, payload))
    }

    /// Read back a block of this thread from the content store.
    pub async fn payload(&self, hash: &BlockHash) -> Result<(BlockHeader, BlockPayload)> {
        let bytes = self.services.store.fetch(hash).await?;
        let block = ThreadBlock::from_bytes(&bytes)
            .map_err(|e| ThreadError::Decode(format!("bad envelope: {e}")))?;
        if block.header.thread_id != self.record.id {
            return Err(ThreadError::NotFound(*hash));
        }
        let payload = block.open(&self.record.sk)?;
        Ok((block.header, payload))
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.record.id)
            .field("name", &self.record.name)
            .finish_non_exhaustive()
    }
}
