use thiserror::Error;

use skein_shared::invite::InviteError;
use skein_shared::types::{BlockHash, ThreadId};
use skein_shared::SharedError;
use skein_store::StoreError;

/// Errors produced by the thread protocol.
#[derive(Error, Debug)]
pub enum ThreadError {
    /// Content store unreachable, full, or refused the bytes. Nothing was
    /// applied.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Object absent locally and unreachable from peers.
    #[error("Block not found: {0}")]
    NotFound(BlockHash),

    /// Local index write or read failed. A stored block stays unapplied.
    #[error("Index error: {0}")]
    Index(#[from] StoreError),

    #[error("Index lock poisoned")]
    IndexLock,

    /// Malformed incoming block. Dropped without retry.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Author key unusable or signature mismatch. Dropped without retry.
    #[error("Unknown author: {0}")]
    UnknownAuthor(String),

    /// Parents not indexed yet. Fetch them and retry.
    #[error("Causal gap: {} missing parent(s)", missing.len())]
    CausalGap { missing: Vec<BlockHash> },

    #[error("Unable to announce, no contact for self")]
    MissingContact,

    #[error("Thread not found: {0}")]
    ThreadNotFound(ThreadId),

    #[error("Already a member of thread {0}")]
    AlreadyMember(ThreadId),

    #[error("Thread key already in use: {0}")]
    KeyInUse(String),

    #[error("Not permitted: {0}")]
    NotPermitted(String),

    /// A locally drafted block failed validation.
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Invite error: {0}")]
    Invite(#[from] InviteError),
}

impl ThreadError {
    /// Whether the same block may apply later (after fetching ancestors or
    /// once the index recovers).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CausalGap { .. } | Self::Index(_) | Self::IndexLock | Self::Storage(_)
        )
    }
}

impl From<SharedError> for ThreadError {
    fn from(e: SharedError) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ThreadError>;
