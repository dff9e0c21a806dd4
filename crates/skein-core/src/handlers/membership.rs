//! Membership blocks: invites, joins and leaves.

use tracing::{debug, info};

use skein_shared::protocol::{BlockPayload, BlockType, ExternalInvite, Invite, Join};

use super::announce::{contact_card, store_contact};
use super::{wrong_draft, BlockHandler, Draft, HandlerContext, IncomingBlock};
use crate::error::{Result, ThreadError};

/// Records a grant of membership to a known peer.
pub struct InviteHandler;

impl BlockHandler for InviteHandler {
    fn block_type(&self) -> BlockType {
        BlockType::Invite
    }

    fn build(&self, ctx: &HandlerContext<'_>, draft: Draft) -> Result<BlockPayload> {
        let Draft::Invite { invitee } = draft else {
            return Err(wrong_draft(BlockType::Invite, &draft));
        };
        ctx.ensure_may_invite()?;
        if invitee == ctx.local {
            return Err(ThreadError::InvalidBlock("cannot invite yourself".to_string()));
        }
        Ok(BlockPayload::Invite(Invite { invitee }))
    }
}

/// Records that a sealed invite for this thread was handed out.
pub struct ExternalInviteHandler;

impl BlockHandler for ExternalInviteHandler {
    fn block_type(&self) -> BlockType {
        BlockType::ExternalInvite
    }

    fn build(&self, ctx: &HandlerContext<'_>, draft: Draft) -> Result<BlockPayload> {
        let Draft::ExternalInvite { invite_id } = draft else {
            return Err(wrong_draft(BlockType::ExternalInvite, &draft));
        };
        ctx.ensure_may_invite()?;
        Ok(BlockPayload::ExternalInvite(ExternalInvite { invite_id }))
    }
}

/// A peer entering the thread. Carries its contact card when it has one.
pub struct JoinHandler;

impl BlockHandler for JoinHandler {
    fn block_type(&self) -> BlockType {
        BlockType::Join
    }

    fn build(&self, ctx: &HandlerContext<'_>, draft: Draft) -> Result<BlockPayload> {
        let Draft::Join { inviter } = draft else {
            return Err(wrong_draft(BlockType::Join, &draft));
        };
        let contact = ctx.index.contact(&ctx.local)?.map(|c| contact_card(&c));
        Ok(BlockPayload::Join(Join { inviter, contact }))
    }

    fn apply(&self, ctx: &HandlerContext<'_>, block: &IncomingBlock<'_>) -> Result<()> {
        let BlockPayload::Join(join) = block.payload else {
            return Err(ThreadError::Decode("expected join payload".to_string()));
        };
        let author = block.header.author;
        if author == ctx.local {
            return Ok(());
        }

        if let Some(card) = &join.contact {
            store_contact(ctx, author, card)?;
        }
        if ctx.index.add_peer(&ctx.thread.id, &author)? {
            info!(thread = %ctx.thread.id, peer = %author.short(), "Peer joined");
        }
        Ok(())
    }
}

/// A peer leaving. It stops receiving new blocks from us.
pub struct LeaveHandler;

impl BlockHandler for LeaveHandler {
    fn block_type(&self) -> BlockType {
        BlockType::Leave
    }

    fn build(&self, _ctx: &HandlerContext<'_>, draft: Draft) -> Result<BlockPayload> {
        match draft {
            Draft::Leave => Ok(BlockPayload::Leave),
            other => Err(wrong_draft(BlockType::Leave, &other)),
        }
    }

    fn apply(&self, ctx: &HandlerContext<'_>, block: &IncomingBlock<'_>) -> Result<()> {
        let author = block.header.author;
        if ctx.index.remove_peer(&ctx.thread.id, &author)? {
            debug!(thread = %ctx.thread.id, peer = %author.short(), "Peer left");
        }
        Ok(())
    }
}
