//! Domain model structs persisted in the local index.
//!
//! Every struct derives `Serialize` so it can be handed directly to the HTTP
//! layer.

use chrono::{DateTime, Utc};
use serde::Serialize;

use skein_shared::crypto::SymmetricKey;
use skein_shared::protocol::BlockType;
use skein_shared::types::{BlockHash, PeerId, ThreadId, ThreadType};

// ---------------------------------------------------------------------------
// Thread
// ---------------------------------------------------------------------------

/// A thread this node participates in.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ThreadRecord {
    pub id: ThreadId,
    /// Locally unique key an application uses to find the thread again.
    pub key: String,
    pub name: String,
    pub thread_type: ThreadType,
    /// Content hash of the thread's schema, if any.
    pub schema: Option<String>,
    pub owner: PeerId,
    /// Symmetric key encrypting every block body. Never serialized.
    #[serde(skip)]
    pub sk: SymmetricKey,
    /// Latest applied block, `None` for an empty thread.
    pub head: Option<BlockHash>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// Index row for one block.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BlockRecord {
    pub id: BlockHash,
    pub thread_id: ThreadId,
    pub block_type: BlockType,
    pub author: PeerId,
    pub parents: Vec<BlockHash>,
    pub date: u64,
    /// Auxiliary cross-reference, e.g. the block a comment targets.
    pub target: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Local commit order. Zero until the row is written.
    pub seq: i64,
}

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// Directory entry for a peer, as last announced.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ContactRecord {
    pub peer_id: PeerId,
    pub username: String,
    pub avatar: Option<String>,
    /// Delivery address of the peer's inbox.
    pub inbox: Option<String>,
    pub updated_at: DateTime<Utc>,
}
