use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{self, SymmetricKey};
use crate::error::{IdentityError, SharedError};
use crate::identity::{self, Identity};
use crate::types::{BlockHash, PeerId, ThreadId, ThreadType};

/// Every kind of block a thread can hold. Closed set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum BlockType {
    Merge = 0,
    Ignore = 1,
    Announce = 2,
    Invite = 3,
    ExternalInvite = 4,
    Join = 5,
    Leave = 6,
    Files = 7,
    Message = 8,
    Comment = 9,
    Like = 10,
}

impl BlockType {
    pub const ALL: [BlockType; 11] = [
        Self::Merge,
        Self::Ignore,
        Self::Announce,
        Self::Invite,
        Self::ExternalInvite,
        Self::Join,
        Self::Leave,
        Self::Files,
        Self::Message,
        Self::Comment,
        Self::Like,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merge => "MERGE",
            Self::Ignore => "IGNORE",
            Self::Announce => "ANNOUNCE",
            Self::Invite => "INVITE",
            Self::ExternalInvite => "EXTERNAL_INVITE",
            Self::Join => "JOIN",
            Self::Leave => "LEAVE",
            Self::Files => "FILES",
            Self::Message => "MESSAGE",
            Self::Comment => "COMMENT",
            Self::Like => "LIKE",
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        Self::ALL.get(b as usize).copied()
    }
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BlockType {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SharedError::Protocol(format!("unknown block type: {s}")))
    }
}

/// Signed block header. The signature covers every other header field plus
/// the encrypted body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    pub thread_id: ThreadId,
    pub block_type: BlockType,
    pub author: PeerId,
    /// Normally one parent, two for merges, none for the first block.
    pub parents: Vec<BlockHash>,
    /// Logical clock: strictly greater than every parent's date.
    pub date: u64,
    pub signature: Vec<u8>,
}

#[derive(Serialize)]
struct SigningView<'a> {
    thread_id: &'a ThreadId,
    block_type: BlockType,
    author: &'a PeerId,
    parents: &'a [BlockHash],
    date: u64,
    body: &'a [u8],
}

impl BlockHeader {
    fn signing_bytes(&self, body: &[u8]) -> Result<Vec<u8>, SharedError> {
        Ok(bincode::serialize(&SigningView {
            thread_id: &self.thread_id,
            block_type: self.block_type,
            author: &self.author,
            parents: &self.parents,
            date: self.date,
            body,
        })?)
    }
}

/// The envelope stored in the content store and shipped to peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadBlock {
    pub header: BlockHeader,
    /// XChaCha20-Poly1305 ciphertext of the bincode payload (thread key).
    pub body: Vec<u8>,
}

impl ThreadBlock {
    /// Encrypt and sign a payload into a new block.
    pub fn seal(
        identity: &Identity,
        thread_id: ThreadId,
        parents: Vec<BlockHash>,
        date: u64,
        key: &SymmetricKey,
        payload: &BlockPayload,
    ) -> Result<Self, SharedError> {
        let plaintext = bincode::serialize(payload)?;
        let body = crypto::seal(key, thread_id.as_str().as_bytes(), &plaintext)?;
        let mut header = BlockHeader {
            thread_id,
            block_type: payload.block_type(),
            author: identity.peer_id(),
            parents,
            date,
            signature: Vec::new(),
        };
        header.signature = identity.sign(&header.signing_bytes(&body)?).to_bytes().to_vec();
        Ok(Self { header, body })
    }

    /// Check the author's signature over header and body.
    pub fn verify(&self) -> Result<(), IdentityError> {
        let message = self
            .header
            .signing_bytes(&self.body)
            .map_err(|_| IdentityError::BadSignature)?;
        identity::verify_signature(&self.header.author, &message, &self.header.signature)
    }

    /// Decrypt and decode the payload, rejecting a payload whose variant
    /// disagrees with the header's block type.
    pub fn open(&self, key: &SymmetricKey) -> Result<BlockPayload, SharedError> {
        let plaintext = crypto::open(key, self.header.thread_id.as_str().as_bytes(), &self.body)?;
        let payload: BlockPayload = bincode::deserialize(&plaintext)?;
        if payload.block_type() != self.header.block_type {
            return Err(SharedError::Protocol(format!(
                "payload is {} but header says {}",
                payload.block_type(),
                self.header.block_type
            )));
        }
        Ok(payload)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

/// Contact card carried by announce and join blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub peer_id: PeerId,
    pub username: String,
    /// Content hash of the avatar image, if any.
    pub avatar: Option<String>,
    /// Address where the peer accepts block deliveries.
    pub inbox: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Announce {
    pub contact: Option<Contact>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invite {
    pub invitee: PeerId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalInvite {
    /// Hash of the sealed invite object in the content store.
    pub invite_id: BlockHash,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Join {
    pub inviter: Option<PeerId>,
    pub contact: Option<Contact>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Files {
    /// Content hash of the file (or pinned directory manifest).
    pub target: String,
    pub caption: Option<String>,
    /// Per-file decryption keys, keyed by path inside the target.
    pub keys: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub target: BlockHash,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Like {
    pub target: BlockHash,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ignore {
    pub target: BlockHash,
}

/// Type-specific block content. One variant per [`BlockType`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum BlockPayload {
    Merge,
    Ignore(Ignore),
    Announce(Announce),
    Invite(Invite),
    ExternalInvite(ExternalInvite),
    Join(Join),
    Leave,
    Files(Files),
    Message(Message),
    Comment(Comment),
    Like(Like),
}

impl BlockPayload {
    pub fn block_type(&self) -> BlockType {
        match self {
            Self::Merge => BlockType::Merge,
            Self::Ignore(_) => BlockType::Ignore,
            Self::Announce(_) => BlockType::Announce,
            Self::Invite(_) => BlockType::Invite,
            Self::ExternalInvite(_) => BlockType::ExternalInvite,
            Self::Join(_) => BlockType::Join,
            Self::Leave => BlockType::Leave,
            Self::Files(_) => BlockType::Files,
            Self::Message(_) => BlockType::Message,
            Self::Comment(_) => BlockType::Comment,
            Self::Like(_) => BlockType::Like,
        }
    }

    /// The auxiliary cross-reference recorded in the index row.
    pub fn target(&self) -> Option<String> {
        match self {
            Self::Ignore(p) => Some(p.target.to_hex()),
            Self::Invite(p) => Some(p.invitee.to_hex()),
            Self::ExternalInvite(p) => Some(p.invite_id.to_hex()),
            Self::Files(p) => Some(p.target.clone()),
            Self::Comment(p) => Some(p.target.to_hex()),
            Self::Like(p) => Some(p.target.to_hex()),
            Self::Merge
            | Self::Announce(_)
            | Self::Join(_)
            | Self::Leave
            | Self::Message(_) => None,
        }
    }
}

/// Everything a new member needs to participate in a thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadSeed {
    pub id: ThreadId,
    pub name: String,
    pub thread_type: ThreadType,
    pub schema: Option<String>,
    pub owner: PeerId,
    pub key: SymmetricKey,
}

/// Invite sent straight to a known peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectInvite {
    pub inviter: PeerId,
    pub thread: ThreadSeed,
    /// The INVITE block recording the grant.
    pub block: BlockHash,
    /// How to reach the inviter.
    pub contact: Option<Contact>,
}

/// All messages exchanged between peers over the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireMessage {
    /// A serialized [`ThreadBlock`] for a thread both peers share.
    Block { thread_id: ThreadId, block: Vec<u8> },

    /// Membership offer for a thread the receiver does not know yet.
    Invite(DirectInvite),
}

impl WireMessage {
    /// Serialize to binary (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}
