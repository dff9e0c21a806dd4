//! Blocks that shape the graph rather than carry content.

use skein_shared::protocol::{BlockPayload, BlockType, Ignore};

use super::{wrong_draft, BlockHandler, Draft, HandlerContext};
use crate::error::Result;

/// Joins two heads. Built by the thread itself when histories diverge.
pub struct MergeHandler;

impl BlockHandler for MergeHandler {
    fn block_type(&self) -> BlockType {
        BlockType::Merge
    }

    fn build(&self, _ctx: &HandlerContext<'_>, draft: Draft) -> Result<BlockPayload> {
        match draft {
            Draft::Merge => Ok(BlockPayload::Merge),
            other => Err(wrong_draft(BlockType::Merge, &other)),
        }
    }
}

/// Hides an earlier block from listings. The target stays in the graph.
pub struct IgnoreHandler;

impl BlockHandler for IgnoreHandler {
    fn block_type(&self) -> BlockType {
        BlockType::Ignore
    }

    fn build(&self, ctx: &HandlerContext<'_>, draft: Draft) -> Result<BlockPayload> {
        let Draft::Ignore { target } = draft else {
            return Err(wrong_draft(BlockType::Ignore, &draft));
        };
        ctx.ensure_local_target(&target)?;
        Ok(BlockPayload::Ignore(Ignore { target }))
    }
}
