//! User content: files, messages, comments and likes. None of these have
//! side effects beyond being indexed.

use skein_shared::protocol::{BlockPayload, BlockType, Comment, Files, Like, Message};

use super::{wrong_draft, BlockHandler, Draft, HandlerContext};
use crate::error::{Result, ThreadError};

pub struct FilesHandler;

impl BlockHandler for FilesHandler {
    fn block_type(&self) -> BlockType {
        BlockType::Files
    }

    fn build(&self, _ctx: &HandlerContext<'_>, draft: Draft) -> Result<BlockPayload> {
        let Draft::Files {
            target,
            caption,
            keys,
        } = draft
        else {
            return Err(wrong_draft(BlockType::Files, &draft));
        };
        if target.trim().is_empty() {
            return Err(ThreadError::InvalidBlock("files target is empty".to_string()));
        }
        Ok(BlockPayload::Files(Files {
            target,
            caption,
            keys,
        }))
    }
}

pub struct MessageHandler;

impl BlockHandler for MessageHandler {
    fn block_type(&self) -> BlockType {
        BlockType::Message
    }

    fn build(&self, _ctx: &HandlerContext<'_>, draft: Draft) -> Result<BlockPayload> {
        let Draft::Message { body } = draft else {
            return Err(wrong_draft(BlockType::Message, &draft));
        };
        if body.is_empty() {
            return Err(ThreadError::InvalidBlock("message body is empty".to_string()));
        }
        Ok(BlockPayload::Message(Message { body }))
    }
}

/// Text attached to another block of the same thread.
pub struct CommentHandler;

impl BlockHandler for CommentHandler {
    fn block_type(&self) -> BlockType {
        BlockType::Comment
    }

    fn build(&self, ctx: &HandlerContext<'_>, draft: Draft) -> Result<BlockPayload> {
        let Draft::Comment { target, body } = draft else {
            return Err(wrong_draft(BlockType::Comment, &draft));
        };
        ctx.ensure_local_target(&target)?;
        if body.is_empty() {
            return Err(ThreadError::InvalidBlock("comment body is empty".to_string()));
        }
        Ok(BlockPayload::Comment(Comment { target, body }))
    }
}

pub struct LikeHandler;

impl BlockHandler for LikeHandler {
    fn block_type(&self) -> BlockType {
        BlockType::Like
    }

    fn build(&self, ctx: &HandlerContext<'_>, draft: Draft) -> Result<BlockPayload> {
        let Draft::Like { target } = draft else {
            return Err(wrong_draft(BlockType::Like, &draft));
        };
        ctx.ensure_local_target(&target)?;
        Ok(BlockPayload::Like(Like { target }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use skein_shared::types::{BlockHash, PeerId, ThreadType};
    use skein_store::BlockRecord;

    use super::*;
    use crate::handlers::tests::record;
    use crate::index::Index;

    #[test]
    fn comment_needs_indexed_target() {
        let index = Index::in_memory().unwrap();
        let me = PeerId([1u8; 32]);
        let thread = record(me, ThreadType::Open);
        index.insert_thread(&thread).unwrap();
        let ctx = HandlerContext {
            thread: &thread,
            local: me,
            index: &index,
        };

        let target = BlockHash::of(b"photo");
        let draft = Draft::Comment {
            target,
            body: "nice".to_string(),
        };
        assert!(matches!(
            CommentHandler.build(&ctx, draft.clone()),
            Err(ThreadError::InvalidBlock(_))
        ));

        index
            .upsert_block(&BlockRecord {
                id: target,
                thread_id: thread.id.clone(),
                block_type: BlockType::Files,
                author: me,
                parents: vec![],
                date: 1,
                target: Some("QmFile".to_string()),
                created_at: Utc::now(),
                seq: 0,
            })
            .unwrap();
        let payload = CommentHandler.build(&ctx, draft).unwrap();
        assert_eq!(payload.target(), Some(target.to_hex()));
    }

    #[test]
    fn empty_message_rejected() {
        let index = Index::in_memory().unwrap();
        let thread = record(PeerId([1u8; 32]), ThreadType::Open);
        let ctx = HandlerContext {
            thread: &thread,
            local: PeerId([1u8; 32]),
            index: &index,
        };
        assert!(MessageHandler
            .build(&ctx, Draft::Message { body: String::new() })
            .is_err());
        assert!(FilesHandler
            .build(
                &ctx,
                Draft::Files {
                    target: " ".to_string(),
                    caption: None,
                    keys: vec![]
                }
            )
            .is_err());
    }
}
