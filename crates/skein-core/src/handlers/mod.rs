//! Per-type block semantics.
//!
//! Every [`BlockType`] has exactly one handler. A handler knows how to turn a
//! local [`Draft`] into the payload that gets committed, and what side
//! effects an incoming block of its type has on local state. Committing,
//! indexing and head bookkeeping stay with the thread; handlers never touch
//! the head.

mod announce;
mod content;
mod membership;
mod structural;

use std::collections::HashMap;

use skein_shared::protocol::{BlockHeader, BlockPayload, BlockType};
use skein_shared::types::{BlockHash, PeerId, ThreadType};
use skein_store::ThreadRecord;

use crate::error::{Result, ThreadError};
use crate::index::Index;

pub use announce::AnnounceHandler;
pub use content::{CommentHandler, FilesHandler, LikeHandler, MessageHandler};
pub use membership::{ExternalInviteHandler, InviteHandler, JoinHandler, LeaveHandler};
pub use structural::{IgnoreHandler, MergeHandler};

/// What a caller asks a thread to add, before it becomes a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Draft {
    Merge,
    Ignore { target: BlockHash },
    Announce,
    Invite { invitee: PeerId },
    ExternalInvite { invite_id: BlockHash },
    Join { inviter: Option<PeerId> },
    Leave,
    Files {
        target: String,
        caption: Option<String>,
        keys: Vec<(String, String)>,
    },
    Message { body: String },
    Comment { target: BlockHash, body: String },
    Like { target: BlockHash },
}

impl Draft {
    pub fn block_type(&self) -> BlockType {
        match self {
            Self::Merge => BlockType::Merge,
            Self::Ignore { .. } => BlockType::Ignore,
            Self::Announce => BlockType::Announce,
            Self::Invite { .. } => BlockType::Invite,
            Self::ExternalInvite { .. } => BlockType::ExternalInvite,
            Self::Join { .. } => BlockType::Join,
            Self::Leave => BlockType::Leave,
            Self::Files { .. } => BlockType::Files,
            Self::Message { .. } => BlockType::Message,
            Self::Comment { .. } => BlockType::Comment,
            Self::Like { .. } => BlockType::Like,
        }
    }
}

/// Read-only view a handler works against.
pub struct HandlerContext<'a> {
    pub thread: &'a ThreadRecord,
    /// This node.
    pub local: PeerId,
    pub index: &'a Index,
}

impl HandlerContext<'_> {
    /// Private threads only let their owner grant membership.
    pub(crate) fn ensure_may_invite(&self) -> Result<()> {
        if self.thread.thread_type == ThreadType::Private && self.local != self.thread.owner {
            return Err(ThreadError::NotPermitted(format!(
                "only the owner may invite to private thread {}",
                self.thread.id
            )));
        }
        Ok(())
    }

    /// A target must be a block of this thread that is already indexed.
    pub(crate) fn ensure_local_target(&self, target: &BlockHash) -> Result<()> {
        match self.index.block(target) {
            Ok(record) if record.thread_id == self.thread.id => Ok(()),
            Ok(_) => Err(ThreadError::InvalidBlock(format!(
                "target {} belongs to another thread",
                target.short()
            ))),
            Err(ThreadError::NotFound(_)) => Err(ThreadError::InvalidBlock(format!(
                "unknown target {}",
                target.short()
            ))),
            Err(e) => Err(e),
        }
    }
}

/// A verified, decrypted block on its way into the thread.
pub struct IncomingBlock<'a> {
    pub hash: BlockHash,
    pub header: &'a BlockHeader,
    pub payload: &'a BlockPayload,
}

pub trait BlockHandler: Send + Sync {
    fn block_type(&self) -> BlockType;

    /// Produce the payload for a locally authored block.
    fn build(&self, ctx: &HandlerContext<'_>, draft: Draft) -> Result<BlockPayload>;

    /// Side effects of a remote block, run before it is indexed. Must be
    /// safe to repeat.
    fn apply(&self, _ctx: &HandlerContext<'_>, _block: &IncomingBlock<'_>) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn wrong_draft(expected: BlockType, draft: &Draft) -> ThreadError {
    ThreadError::InvalidBlock(format!(
        "{} handler cannot build {}",
        expected,
        draft.block_type()
    ))
}

/// Handler lookup by block type.
pub struct HandlerRegistry {
    handlers: HashMap<BlockType, Box<dyn BlockHandler>>,
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler`, replacing any handler for the same type.
    pub fn register(&mut self, handler: Box<dyn BlockHandler>) {
        self.handlers.insert(handler.block_type(), handler);
    }

    pub fn get(&self, block_type: BlockType) -> Result<&dyn BlockHandler> {
        self.handlers
            .get(&block_type)
            .map(|h| h.as_ref())
            .ok_or_else(|| ThreadError::Decode(format!("no handler for {block_type}")))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(MergeHandler));
        registry.register(Box::new(IgnoreHandler));
        registry.register(Box::new(AnnounceHandler));
        registry.register(Box::new(InviteHandler));
        registry.register(Box::new(ExternalInviteHandler));
        registry.register(Box::new(JoinHandler));
        registry.register(Box::new(LeaveHandler));
        registry.register(Box::new(FilesHandler));
        registry.register(Box::new(MessageHandler));
        registry.register(Box::new(CommentHandler));
        registry.register(Box::new(LikeHandler));
        registry
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::Utc;
    use skein_shared::crypto;
    use skein_shared::types::ThreadId;

    use super::*;

    pub fn record(owner: PeerId, thread_type: ThreadType) -> ThreadRecord {
        ThreadRecord {
            id: ThreadId::from("t1"),
            key: "t1-key".to_string(),
            name: "t1".to_string(),
            thread_type,
            schema: None,
            owner,
            sk: crypto::generate_symmetric_key(),
            head: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn default_registry_covers_every_type() {
        let registry = HandlerRegistry::default();
        for t in BlockType::ALL {
            assert_eq!(registry.get(t).unwrap().block_type(), t);
        }
    }

    #[test]
    fn private_thread_rejects_member_invites() {
        let index = Index::in_memory().unwrap();
        let owner = PeerId([1u8; 32]);
        let member = PeerId([2u8; 32]);
        let thread = record(owner, ThreadType::Private);

        let ctx = HandlerContext {
            thread: &thread,
            local: member,
            index: &index,
        };
        let err = InviteHandler
            .build(&ctx, Draft::Invite { invitee: PeerId([3u8; 32]) })
            .unwrap_err();
        assert!(matches!(err, ThreadError::NotPermitted(_)));

        let ctx = HandlerContext {
            thread: &thread,
            local: owner,
            index: &index,
        };
        assert!(InviteHandler
            .build(&ctx, Draft::Invite { invitee: PeerId([3u8; 32]) })
            .is_ok());
    }

    #[test]
    fn open_thread_lets_members_invite() {
        let index = Index::in_memory().unwrap();
        let thread = record(PeerId([1u8; 32]), ThreadType::Open);
        let ctx = HandlerContext {
            thread: &thread,
            local: PeerId([2u8; 32]),
            index: &index,
        };
        assert!(ExternalInviteHandler
            .build(&ctx, Draft::ExternalInvite { invite_id: BlockHash::of(b"x") })
            .is_ok());
    }

    #[test]
    fn mismatched_draft_rejected() {
        let index = Index::in_memory().unwrap();
        let thread = record(PeerId([1u8; 32]), ThreadType::Open);
        let ctx = HandlerContext {
            thread: &thread,
            local: PeerId([1u8; 32]),
            index: &index,
        };
        let err = MessageHandler.build(&ctx, Draft::Leave).unwrap_err();
        assert!(matches!(err, ThreadError::InvalidBlock(_)));
    }
}
