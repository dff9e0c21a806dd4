//! A peer: the set of threads it belongs to plus everything they share.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use skein_shared::constants::{
    DEFAULT_DELIVERY_TIMEOUT_SECS, DEFAULT_MAX_ANCESTOR_DEPTH, DEFAULT_PEER_IDLE_SECS, DEFAULT_UPDATE_CAPACITY,
};
use skein_shared::identity::Identity;
use skein_shared::invite::{InviteCode, SealedInvite};
use skein_shared::protocol::{
    BlockHeader, BlockPayload, BlockType, Contact, DirectInvite, ThreadSeed, WireMessage,
};
use skein_shared::types::{BlockHash, PeerId, ThreadId, ThreadType};
use skein_store::{BlockRecord, ContactRecord, ThreadRecord};

use crate::error::{Result, ThreadError};
use crate::handlers::{Draft, HandlerRegistry};
use crate::index::Index;
use crate::propagation::{Envelope, PeerTransport, Propagator};
use crate::store::BlockStore;
use crate::thread::{Applied, Services, Thread};
use crate::updates::{UpdateHub, UpdateStream};

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub max_ancestor_depth: usize,
    pub delivery_timeout: Duration,
    /// How long a peer's delivery worker waits for work before exiting.
    pub peer_idle_timeout: Duration,
    /// Updates buffered per subscriber before it has to reread the index.
    pub update_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            max_ancestor_depth: DEFAULT_MAX_ANCESTOR_DEPTH,
            delivery_timeout: Duration::from_secs(DEFAULT_DELIVERY_TIMEOUT_SECS),
            peer_idle_timeout: Duration::from_secs(DEFAULT_PEER_IDLE_SECS),
            update_capacity: DEFAULT_UPDATE_CAPACITY,
        }
    }
}

/// Parameters for a new thread.
#[derive(Debug, Clone)]
pub struct NewThread {
    pub name: String,
    /// Application key for finding the thread again. Random when `None`.
    pub key: Option<String>,
    pub thread_type: ThreadType,
    pub schema: Option<String>,
}

/// Outcome of one inbound wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Block {
        thread_id: ThreadId,
        hash: BlockHash,
        applied: Applied,
    },
    /// A direct invite is waiting for [`Node::accept_invite`].
    Invite(BlockHash),
}

/// Where a joiner's history starts.
enum Backfill {
    /// The INVITE block that names us.
    Invite(BlockHash),
    /// An external invite's snapshot of the head.
    Head(Option<BlockHash>),
}

pub struct Node {
    services: Arc<Services>,
    threads: RwLock<HashMap<ThreadId, Arc<Thread>>>,
    /// Direct invites received but not yet accepted, by INVITE block hash.
    invites: Mutex<HashMap<BlockHash, DirectInvite>>,
}

impl Node {
    /// Build a node over an index, loading every thread it already holds.
    pub fn new(
        identity: Identity,
        store: Arc<dyn BlockStore>,
        index: Index,
        transport: Arc<dyn PeerTransport>,
        config: NodeConfig,
    ) -> Result<Self> {
        let services = Arc::new(Services {
            identity,
            store,
            index,
            propagator: Arc::new(Propagator::new(
                transport,
                config.delivery_timeout,
                config.peer_idle_timeout,
            )),
            handlers: HandlerRegistry::default(),
            updates: UpdateHub::with_capacity(config.update_capacity),
            max_ancestor_depth: config.max_ancestor_depth,
        });

        let mut threads = HashMap::new();
        for record in services.index.threads()? {
            let id = record.id.clone();
            threads.insert(id, Arc::new(Thread::new(record, Arc::clone(&services))));
        }
        info!(
            peer = %services.identity.peer_id().short(),
            threads = threads.len(),
            "Node started"
        );

        Ok(Self {
            services,
            threads: RwLock::new(threads),
            invites: Mutex::new(HashMap::new()),
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.services.identity.peer_id()
    }

    pub fn identity(&self) -> &Identity {
        &self.services.identity
    }

    pub fn index(&self) -> &Index {
        &self.services.index
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.services.store
    }

    // -----------------------------------------------------------------------
    // Contacts
    // -----------------------------------------------------------------------

    /// Set the contact card other peers learn about through announce and
    /// join blocks.
    pub fn set_profile(
        &self,
        username: &str,
        avatar: Option<String>,
        inbox: Option<String>,
    ) -> Result<ContactRecord> {
        let contact = ContactRecord {
            peer_id: self.peer_id(),
            username: username.to_string(),
            avatar,
            inbox,
            updated_at: Utc::now(),
        };
        self.services.index.upsert_contact(&contact)?;
        Ok(contact)
    }

    pub fn profile(&self) -> Result<Option<ContactRecord>> {
        self.services.index.contact(&self.peer_id())
    }

    /// Record how to reach a peer we have not heard from yet.
    pub fn add_contact(&self, contact: ContactRecord) -> Result<()> {
        if contact.peer_id == self.peer_id() {
            return Err(ThreadError::NotPermitted(
                "use set_profile for the local contact".to_string(),
            ));
        }
        self.services.index.upsert_contact(&contact)
    }

    pub fn contact(&self, peer: &PeerId) -> Result<Option<ContactRecord>> {
        self.services.index.contact(peer)
    }

    pub fn contacts(&self) -> Result<Vec<ContactRecord>> {
        self.services.index.contacts()
    }

    fn own_card(&self) -> Result<Option<Contact>> {
        Ok(self.profile()?.map(|c| Contact {
            peer_id: c.peer_id,
            username: c.username,
            avatar: c.avatar,
            inbox: c.inbox,
            updated_at: c.updated_at,
        }))
    }

    // -----------------------------------------------------------------------
    // Threads
    // -----------------------------------------------------------------------

    pub fn thread(&self, id: &ThreadId) -> Result<Arc<Thread>> {
        self.threads
            .read()
            .map_err(|_| ThreadError::IndexLock)?
            .get(id)
            .cloned()
            .ok_or_else(|| ThreadError::ThreadNotFound(id.clone()))
    }

    fn register(&self, record: ThreadRecord) -> Result<Arc<Thread>> {
        let thread = Arc::new(Thread::new(record, Arc::clone(&self.services)));
        self.threads
            .write()
            .map_err(|_| ThreadError::IndexLock)?
            .insert(thread.id().clone(), Arc::clone(&thread));
        Ok(thread)
    }

    fn forget(&self, id: &ThreadId) -> Result<()> {
        self.threads
            .write()
            .map_err(|_| ThreadError::IndexLock)?
            .remove(id);
        self.services.index.delete_thread(id)?;
        Ok(())
    }

    /// Create a thread owned by this node. Its first block is our JOIN.
    pub async fn add_thread(&self, new: NewThread) -> Result<ThreadRecord> {
        let key = new.key.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if self.services.index.thread_by_key(&key)?.is_some() {
            return Err(ThreadError::KeyInUse(key));
        }

        let record = ThreadRecord {
            id: ThreadId::new(),
            key,
            name: new.name,
            thread_type: new.thread_type,
            schema: new.schema,
            owner: self.peer_id(),
            sk: skein_shared::crypto::generate_symmetric_key(),
            head: None,
            created_at: Utc::now(),
        };
        self.services.index.insert_thread(&record)?;
        let thread = self.register(record)?;

        thread.add_block(Draft::Join { inviter: None }).await?;
        info!(thread = %thread.id(), "Thread created");
        Ok(thread.info().await)
    }

    /// Every local thread with its current head.
    pub async fn threads(&self) -> Result<Vec<ThreadRecord>> {
        let threads: Vec<Arc<Thread>> = self
            .threads
            .read()
            .map_err(|_| ThreadError::IndexLock)?
            .values()
            .cloned()
            .collect();

        let mut records = Vec::with_capacity(threads.len());
        for thread in threads {
            records.push(thread.info().await);
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    /// Leave a thread: post a LEAVE block, then drop all local state.
    pub async fn remove_thread(&self, id: &ThreadId) -> Result<BlockHash> {
        let thread = self.thread(id)?;
        let hash = thread.add_block(Draft::Leave).await?;
        self.forget(id)?;
        info!(thread = %id, "Thread removed");
        Ok(hash)
    }

    pub fn peers(&self, id: &ThreadId) -> Result<Vec<PeerId>> {
        self.thread(id)?.peers()
    }

    // -----------------------------------------------------------------------
    // Blocks
    // -----------------------------------------------------------------------

    pub async fn announce(&self, id: &ThreadId) -> Result<BlockHash> {
        self.thread(id)?.add_block(Draft::Announce).await
    }

    pub async fn add_message(&self, id: &ThreadId, body: &str) -> Result<BlockHash> {
        self.thread(id)?
            .add_block(Draft::Message {
                body: body.to_string(),
            })
            .await
    }

    pub async fn add_files(
        &self,
        id: &ThreadId,
        target: &str,
        caption: Option<String>,
        keys: Vec<(String, String)>,
    ) -> Result<BlockHash> {
        self.thread(id)?
            .add_block(Draft::Files {
                target: target.to_string(),
                caption,
                keys,
            })
            .await
    }

    /// The thread an indexed block belongs to.
    fn thread_of(&self, block: &BlockHash) -> Result<Arc<Thread>> {
        let record = self.services.index.block(block)?;
        self.thread(&record.thread_id)
    }

    pub async fn add_comment(&self, target: &BlockHash, body: &str) -> Result<BlockHash> {
        self.thread_of(target)?
            .add_block(Draft::Comment {
                target: *target,
                body: body.to_string(),
            })
            .await
    }

    pub async fn add_like(&self, target: &BlockHash) -> Result<BlockHash> {
        self.thread_of(target)?
            .add_block(Draft::Like { target: *target })
            .await
    }

    /// Hide `target` from block listings.
    pub async fn ignore(&self, target: &BlockHash) -> Result<BlockHash> {
        self.thread_of(target)?
            .add_block(Draft::Ignore { target: *target })
            .await
    }

    /// Newest first, skipping ignored blocks.
    pub fn blocks(&self, id: &ThreadId, offset: u32, limit: u32) -> Result<Vec<BlockRecord>> {
        self.thread(id)?;
        let index = &self.services.index;
        let ignored: HashSet<BlockHash> = index.ignored_targets(id)?.into_iter().collect();
        Ok(index
            .blocks(id, offset, limit)?
            .into_iter()
            .filter(|b| !ignored.contains(&b.id))
            .collect())
    }

    pub fn block(&self, hash: &BlockHash) -> Result<BlockRecord> {
        self.services.index.block(hash)
    }

    /// Decrypted content of an indexed block.
    pub async fn block_payload(&self, hash: &BlockHash) -> Result<(BlockHeader, BlockPayload)> {
        self.thread_of(hash)?.payload(hash).await
    }

    /// Stream of blocks indexed in a thread after `since`, replaying the
    /// index first. Dropping the stream unsubscribes.
    pub fn updates(&self, id: &ThreadId, since: i64) -> Result<UpdateStream> {
        self.thread(id)?;
        self.services
            .updates
            .stream(self.services.index.clone(), id.clone(), since)
    }

    // -----------------------------------------------------------------------
    // Invites
    // -----------------------------------------------------------------------

    /// Grant `invitee` membership and send it the thread directly.
    pub async fn add_invite(&self, id: &ThreadId, invitee: PeerId) -> Result<BlockHash> {
        let thread = self.thread(id)?;
        let block = thread.add_block(Draft::Invite { invitee }).await?;

        let invite = WireMessage::Invite(DirectInvite {
            inviter: self.peer_id(),
            thread: thread.seed(),
            block,
            contact: self.own_card()?,
        });
        let data = invite
            .to_bytes()
            .map_err(|e| ThreadError::Storage(format!("Failed to encode invite: {e}")))?;
        self.services.propagator.enqueue(invitee, data);

        info!(thread = %id, invitee = %invitee.short(), "Invite sent");
        Ok(block)
    }

    /// Direct invites waiting to be accepted.
    pub fn invites(&self) -> Result<Vec<DirectInvite>> {
        Ok(self
            .invites
            .lock()
            .map_err(|_| ThreadError::IndexLock)?
            .values()
            .cloned()
            .collect())
    }

    pub fn decline_invite(&self, block: &BlockHash) -> Result<bool> {
        Ok(self
            .invites
            .lock()
            .map_err(|_| ThreadError::IndexLock)?
            .remove(block)
            .is_some())
    }

    /// Join the thread behind a pending direct invite. Returns our JOIN.
    pub async fn accept_invite(&self, block: &BlockHash) -> Result<BlockHash> {
        let invite = self
            .invites
            .lock()
            .map_err(|_| ThreadError::IndexLock)?
            .remove(block)
            .ok_or(ThreadError::NotFound(*block))?;

        self.join(
            invite.thread,
            invite.inviter,
            invite.contact,
            Backfill::Invite(invite.block),
        )
        .await
    }

    /// Seal the thread into a one-time-key invite stored in the content
    /// store and record it with an EXTERNAL_INVITE block.
    pub async fn add_external_invite(&self, id: &ThreadId) -> Result<InviteCode> {
        let thread = self.thread(id)?;
        let head = thread.head().await;

        let sealed = SealedInvite::create(self.identity(), thread.seed(), head, self.own_card()?)?;
        let (ciphertext, key) = sealed.seal()?;
        let invite_id = self.services.store.store(&ciphertext).await?;

        thread
            .add_block(Draft::ExternalInvite { invite_id })
            .await?;
        info!(thread = %id, invite = %invite_id.short(), "External invite created");
        Ok(InviteCode { id: invite_id, key })
    }

    /// Open an external invite and join its thread. Returns our JOIN.
    pub async fn accept_external_invite(&self, code: &InviteCode) -> Result<BlockHash> {
        let ciphertext = self.services.store.fetch(&code.id).await?;
        let invite = SealedInvite::open(&ciphertext, &code.key)?;
        let payload = invite.payload;
        self.join(
            payload.thread,
            payload.inviter,
            payload.contact,
            Backfill::Head(payload.head),
        )
        .await
    }

    async fn join(
        &self,
        seed: ThreadSeed,
        inviter: PeerId,
        inviter_card: Option<Contact>,
        backfill: Backfill,
    ) -> Result<BlockHash> {
        if self.thread(&seed.id).is_ok() {
            return Err(ThreadError::AlreadyMember(seed.id));
        }

        if let Some(card) = inviter_card.filter(|_| inviter != self.peer_id()) {
            self.services.index.upsert_contact(&ContactRecord {
                peer_id: inviter,
                username: card.username,
                avatar: card.avatar,
                inbox: card.inbox,
                updated_at: card.updated_at,
            })?;
        }

        let record = ThreadRecord {
            id: seed.id.clone(),
            key: uuid::Uuid::new_v4().to_string(),
            name: seed.name,
            thread_type: seed.thread_type,
            schema: seed.schema,
            owner: seed.owner,
            sk: seed.key,
            head: None,
            created_at: Utc::now(),
        };
        self.services.index.insert_thread(&record)?;
        let thread = self.register(record)?;

        let joined = self.backfill_and_join(&thread, inviter, backfill).await;
        if joined.is_err() {
            self.forget(&seed.id)?;
        }
        joined
    }

    async fn backfill_and_join(
        &self,
        thread: &Thread,
        inviter: PeerId,
        backfill: Backfill,
    ) -> Result<BlockHash> {
        self.services.index.add_peer(thread.id(), &inviter)?;

        let head = match backfill {
            Backfill::Invite(block) => Some(block),
            Backfill::Head(head) => head,
        };
        if let Some(head) = head {
            let bytes = self.services.store.fetch(&head).await?;
            let applied = thread.receive(head, bytes).await?;
            debug!(thread = %thread.id(), ?applied, "Backfilled history");
        }
        if let Backfill::Invite(block) = backfill {
            self.check_invite(thread, &block, inviter).await?;
        }

        let join = thread
            .add_block(Draft::Join {
                inviter: Some(inviter),
            })
            .await?;
        info!(thread = %thread.id(), inviter = %inviter.short(), "Joined thread");
        Ok(join)
    }

    /// The backfilled INVITE must be `inviter`'s and name us.
    async fn check_invite(&self, thread: &Thread, block: &BlockHash, inviter: PeerId) -> Result<()> {
        let (header, payload) = thread.payload(block).await?;
        let invitee = match payload {
            BlockPayload::Invite(invite) if header.block_type == BlockType::Invite => invite.invitee,
            _ => {
                return Err(ThreadError::NotPermitted(format!(
                    "{} is not an invite",
                    block.short()
                )))
            }
        };
        if header.author != inviter || invitee != self.peer_id() {
            warn!(
                thread = %thread.id(),
                block = %block.short(),
                author = %header.author.short(),
                invitee = %invitee.short(),
                "Invite does not grant us membership"
            );
            return Err(ThreadError::NotPermitted(format!(
                "invite {} is not addressed to us",
                block.short()
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Handle one wire message from `from`.
    pub async fn receive(&self, from: PeerId, data: &[u8]) -> Result<Received> {
        let message = WireMessage::from_bytes(data).map_err(|e| {
            warn!(from = %from.short(), "Undecodable wire message: {}", e);
            ThreadError::Decode(e.to_string())
        })?;

        match message {
            WireMessage::Block { thread_id, block } => {
                let result = self.receive_block(&thread_id, block).await;
                match &result {
                    Ok(received) => debug!(from = %from.short(), ?received, "Block received"),
                    Err(e) if e.is_retryable() => {
                        info!(from = %from.short(), thread = %thread_id, "Block deferred: {}", e)
                    }
                    Err(e) => warn!(from = %from.short(), thread = %thread_id, "Block dropped: {}", e),
                }
                result
            }
            WireMessage::Invite(invite) => {
                if invite.inviter != from {
                    warn!(from = %from.short(), "Invite sender is not the inviter");
                    return Err(ThreadError::UnknownAuthor(from.short()));
                }
                let block = invite.block;
                info!(
                    from = %from.short(),
                    thread = %invite.thread.id,
                    "Invite received"
                );
                self.invites
                    .lock()
                    .map_err(|_| ThreadError::IndexLock)?
                    .insert(block, invite);
                Ok(Received::Invite(block))
            }
        }
    }

    async fn receive_block(&self, thread_id: &ThreadId, block: Vec<u8>) -> Result<Received> {
        let thread = self.thread(thread_id)?;
        let hash = BlockHash::of(&block);
        let applied = thread.receive(hash, block).await?;
        Ok(Received::Block {
            thread_id: thread_id.clone(),
            hash,
            applied,
        })
    }

    /// Drain an inbox channel into [`Node::receive`] until it closes.
    pub fn spawn_inbox(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<Envelope>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some((from, data)) = inbox.recv().await {
                // Failures are logged by receive.
                let _ = self.receive(from, &data).await;
            }
        })
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("peer_id", &self.peer_id().short())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use tempfile::TempDir;

    use skein_shared::protocol::{Announce, BlockType};

    use super::*;
    use crate::testing::{new_thread, pair, TestPeer};
    use crate::{MemoryBlockStore, MemoryNetwork};

    #[tokio::test]
    async fn announce_overwrites_stale_contact() {
        let (alice, mut bob, id) = pair(ThreadType::Open).await;
        let alice_id = alice.node.peer_id();

        bob.node
            .add_contact(ContactRecord {
                peer_id: alice_id,
                username: "alice-old".to_string(),
                avatar: None,
                inbox: None,
                updated_at: Utc::now(),
            })
            .unwrap();

        alice
            .node
            .set_profile("alice", None, Some("http://alice.local:40600".to_string()))
            .unwrap();
        let announce = alice.node.announce(&id).await.unwrap();

        let Received::Block { applied, hash, .. } = bob.deliver().await else {
            panic!("expected a block");
        };
        assert_eq!(hash, announce);
        assert_eq!(applied, Applied::Advanced);

        let contact = bob.node.contact(&alice_id).unwrap().unwrap();
        assert_eq!(contact.username, "alice");
        assert_eq!(contact.inbox.as_deref(), Some("http://alice.local:40600"));

        let head = bob.node.thread(&id).unwrap().head().await.unwrap();
        let (header, payload) = bob.node.block_payload(&head).await.unwrap();
        assert_eq!(header.block_type, BlockType::Announce);
        let BlockPayload::Announce(Announce { contact: Some(card) }) = payload else {
            panic!("expected an announce with a contact");
        };
        assert_eq!(card.username, "alice");
    }

    #[tokio::test]
    async fn announce_without_profile_fails() {
        let network = MemoryNetwork::new();
        let peer = TestPeer::new(&network, Arc::new(MemoryBlockStore::default()));
        let id = peer
            .node
            .add_thread(new_thread("quiet", ThreadType::Open))
            .await
            .unwrap()
            .id;

        let err = peer.node.announce(&id).await.unwrap_err();
        assert!(matches!(err, ThreadError::MissingContact));
        assert_eq!(peer.node.index().count_blocks(&id).unwrap(), 1);
    }

    #[tokio::test]
    async fn divergent_heads_merge_and_converge() {
        let (mut alice, mut bob, id) = pair(ThreadType::Open).await;

        let a1 = alice.node.add_message(&id, "from alice").await.unwrap();
        let b1 = bob.node.add_message(&id, "from bob").await.unwrap();

        let Received::Block { applied: Applied::Merged(ma), .. } = alice.deliver().await else {
            panic!("alice should merge");
        };
        let Received::Block { applied: Applied::Merged(mb), .. } = bob.deliver().await else {
            panic!("bob should merge");
        };

        let mut expected = vec![a1, b1];
        expected.sort();
        let merge = alice.node.block(&ma).unwrap();
        assert_eq!(merge.block_type, BlockType::Merge);
        assert_eq!(merge.parents, expected);
        assert_eq!(bob.node.block(&mb).unwrap().parents, expected);

        // Each side now receives the other's merge of the same pair.
        alice.deliver().await;
        bob.deliver().await;

        let winner = ma.min(mb);
        assert_eq!(alice.node.thread(&id).unwrap().head().await, Some(winner));
        assert_eq!(bob.node.thread(&id).unwrap().head().await, Some(winner));
        assert!(alice.inbox.try_recv().is_err());
        assert!(bob.inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn external_invite_join() {
        let network = MemoryNetwork::new();
        let store: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::default());
        let mut alice = TestPeer::new(&network, Arc::clone(&store));
        let carol = TestPeer::new(&network, store);

        alice.node.set_profile("alice", None, None).unwrap();
        let id = alice
            .node
            .add_thread(new_thread("party", ThreadType::Open))
            .await
            .unwrap()
            .id;
        alice.node.add_message(&id, "welcome").await.unwrap();

        let code = alice.node.add_external_invite(&id).await.unwrap();
        let invite_block = alice.node.thread(&id).unwrap().head().await.unwrap();
        assert_eq!(
            alice.node.block(&invite_block).unwrap().target,
            Some(code.id.to_hex())
        );

        let text = code.encode().unwrap();
        let join = carol
            .node
            .accept_external_invite(&InviteCode::decode(&text).unwrap())
            .await
            .unwrap();
        assert_eq!(
            carol.node.contact(&alice.node.peer_id()).unwrap().unwrap().username,
            "alice"
        );
        assert_eq!(carol.node.peers(&id).unwrap(), vec![alice.node.peer_id()]);

        // Carol joined from the pre-invite head, so alice has to merge.
        let Received::Block { hash, applied, .. } = alice.deliver().await else {
            panic!("expected carol's join");
        };
        assert_eq!(hash, join);
        assert!(matches!(applied, Applied::Merged(_)));
        assert_eq!(alice.node.peers(&id).unwrap(), vec![carol.node.peer_id()]);

        let wrong = InviteCode {
            id: code.id,
            key: skein_shared::crypto::generate_symmetric_key(),
        };
        assert!(matches!(
            carol.node.accept_external_invite(&wrong).await,
            Err(ThreadError::Invite(_))
        ));
    }

    #[tokio::test]
    async fn invite_must_name_the_joiner() {
        let network = MemoryNetwork::new();
        let store: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::default());
        let mut alice = TestPeer::new(&network, Arc::clone(&store));
        let bob = TestPeer::new(&network, Arc::clone(&store));
        let carol = TestPeer::new(&network, store);

        let id = alice
            .node
            .add_thread(new_thread("guests", ThreadType::Private))
            .await
            .unwrap()
            .id;
        let for_carol = alice.node.add_invite(&id, carol.node.peer_id()).await.unwrap();
        let message = alice.node.add_message(&id, "not an invite").await.unwrap();
        let thread = alice.node.thread(&id).unwrap();

        for block in [for_carol, message] {
            let reused = WireMessage::Invite(DirectInvite {
                inviter: alice.node.peer_id(),
                thread: thread.seed(),
                block,
                contact: None,
            })
            .to_bytes()
            .unwrap();
            bob.node.receive(alice.node.peer_id(), &reused).await.unwrap();

            let err = bob.node.accept_invite(&block).await.unwrap_err();
            assert!(matches!(err, ThreadError::NotPermitted(_)));
            assert!(matches!(
                bob.node.thread(&id),
                Err(ThreadError::ThreadNotFound(_))
            ));
            assert!(bob.node.threads().await.unwrap().is_empty());
        }

        // Nothing was announced to alice.
        assert!(tokio::time::timeout(Duration::from_millis(100), alice.inbox.recv())
            .await
            .is_err());
        assert!(alice.node.peers(&id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn private_thread_invites_are_owner_only() {
        let (alice, bob, id) = pair(ThreadType::Private).await;
        let dave = skein_shared::identity::Identity::generate().peer_id();

        let err = bob.node.add_invite(&id, dave).await.unwrap_err();
        assert!(matches!(err, ThreadError::NotPermitted(_)));
        let err = bob.node.add_external_invite(&id).await.unwrap_err();
        assert!(matches!(err, ThreadError::NotPermitted(_)));

        alice.node.add_invite(&id, dave).await.unwrap();
    }

    #[tokio::test]
    async fn leaving_removes_peer_and_local_state() {
        let (mut alice, bob, id) = pair(ThreadType::Open).await;
        assert_eq!(alice.node.peers(&id).unwrap(), vec![bob.node.peer_id()]);

        let leave = bob.node.remove_thread(&id).await.unwrap();
        assert!(matches!(
            bob.node.thread(&id),
            Err(ThreadError::ThreadNotFound(_))
        ));
        assert!(bob.node.threads().await.unwrap().is_empty());
        assert!(bob.node.blocks(&id, 0, 10).is_err());

        let Received::Block { hash, .. } = alice.deliver().await else {
            panic!("expected a leave");
        };
        assert_eq!(hash, leave);
        assert!(alice.node.peers(&id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn updates_replay_then_follow() {
        let network = MemoryNetwork::new();
        let peer = TestPeer::new(&network, Arc::new(MemoryBlockStore::default()));
        let node = &peer.node;
        let id = node
            .add_thread(new_thread("feed", ThreadType::Open))
            .await
            .unwrap()
            .id;
        let first = node.add_message(&id, "before").await.unwrap();

        let mut all = node.updates(&id, 0).unwrap();
        assert_eq!(all.next().await.unwrap().block_type, BlockType::Join);
        let replayed = all.next().await.unwrap();
        assert_eq!(replayed.block, first);

        let mut tail = node.updates(&id, replayed.seq).unwrap();
        let live = node.add_message(&id, "after").await.unwrap();

        let next = all.next().await.unwrap();
        assert_eq!(next.block, live);
        assert!(next.seq > replayed.seq);
        assert_eq!(tail.next().await.unwrap().block, live);

        assert!(node.updates(&ThreadId::from("nope"), 0).is_err());
    }

    #[tokio::test]
    async fn comments_likes_and_ignores() {
        let network = MemoryNetwork::new();
        let peer = TestPeer::new(&network, Arc::new(MemoryBlockStore::default()));
        let node = &peer.node;
        let id = node
            .add_thread(new_thread("photos", ThreadType::Open))
            .await
            .unwrap()
            .id;

        let files = node
            .add_files(&id, "QmManifest", Some("beach".to_string()), vec![])
            .await
            .unwrap();
        let comment = node.add_comment(&files, "lovely").await.unwrap();
        let like = node.add_like(&files).await.unwrap();
        assert_eq!(node.block(&comment).unwrap().target, Some(files.to_hex()));
        assert_eq!(node.block(&like).unwrap().block_type, BlockType::Like);

        let before = node.blocks(&id, 0, 50).unwrap().len();
        node.ignore(&comment).await.unwrap();
        let listed = node.blocks(&id, 0, 50).unwrap();
        assert!(listed.iter().all(|b| b.id != comment));
        // The ignore block is listed in place of the comment.
        assert_eq!(listed.len(), before);

        assert!(node.add_like(&BlockHash::of(b"unknown")).await.is_err());
    }

    #[tokio::test]
    async fn bad_wire_messages_rejected() {
        let (alice, bob, id) = pair(ThreadType::Open).await;

        let err = bob.node.receive(alice.node.peer_id(), b"garbage").await.unwrap_err();
        assert!(matches!(err, ThreadError::Decode(_)));

        // An invite whose sender is not its inviter.
        let thread = alice.node.thread(&id).unwrap();
        let spoofed = WireMessage::Invite(DirectInvite {
            inviter: alice.node.peer_id(),
            thread: thread.seed(),
            block: BlockHash::of(b"invite"),
            contact: None,
        })
        .to_bytes()
        .unwrap();
        let mallory = skein_shared::identity::Identity::generate().peer_id();
        assert!(bob.node.receive(mallory, &spoofed).await.is_err());
        assert!(bob.node.invites().unwrap().is_empty());

        // Blocks for a thread we are not in.
        let unknown = WireMessage::Block {
            thread_id: ThreadId::from("unknown"),
            block: vec![1, 2, 3],
        }
        .to_bytes()
        .unwrap();
        assert!(matches!(
            bob.node.receive(alice.node.peer_id(), &unknown).await,
            Err(ThreadError::ThreadNotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_thread_key_rejected() {
        let network = MemoryNetwork::new();
        let peer = TestPeer::new(&network, Arc::new(MemoryBlockStore::default()));
        let mut new = new_thread("keyed", ThreadType::Open);
        new.key = Some("app.photos".to_string());

        peer.node.add_thread(new.clone()).await.unwrap();
        assert!(matches!(
            peer.node.add_thread(new).await,
            Err(ThreadError::KeyInUse(_))
        ));
    }

    #[tokio::test]
    async fn threads_survive_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.db");
        let network = MemoryNetwork::new();
        let store: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::default());
        let identity = Identity::generate();

        let make = |identity: Identity| {
            let transport = network.transport(identity.peer_id());
            Node::new(
                identity,
                Arc::clone(&store),
                Index::open(&path).unwrap(),
                transport,
                NodeConfig::default(),
            )
            .unwrap()
        };

        let node = make(identity.clone());
        let id = node
            .add_thread(new_thread("durable", ThreadType::Open))
            .await
            .unwrap()
            .id;
        let head = node.add_message(&id, "persisted").await.unwrap();
        drop(node);

        let node = make(identity);
        let threads = node.threads().await.unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].head, Some(head));

        let next = node.add_message(&id, "again").await.unwrap();
        assert_eq!(node.block(&next).unwrap().parents, vec![head]);
    }
}
