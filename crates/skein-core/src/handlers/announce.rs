use tracing::debug;

use skein_shared::protocol::{Announce, BlockPayload, BlockType, Contact};
use skein_shared::types::PeerId;
use skein_store::ContactRecord;

use super::{wrong_draft, BlockHandler, Draft, HandlerContext, IncomingBlock};
use crate::error::{Result, ThreadError};

/// Broadcasts the local contact card to the thread.
pub struct AnnounceHandler;

impl BlockHandler for AnnounceHandler {
    fn block_type(&self) -> BlockType {
        BlockType::Announce
    }

    fn build(&self, ctx: &HandlerContext<'_>, draft: Draft) -> Result<BlockPayload> {
        if draft != Draft::Announce {
            return Err(wrong_draft(BlockType::Announce, &draft));
        }
        let contact = ctx
            .index
            .contact(&ctx.local)?
            .ok_or(ThreadError::MissingContact)?;
        Ok(BlockPayload::Announce(Announce {
            contact: Some(contact_card(&contact)),
        }))
    }

    fn apply(&self, ctx: &HandlerContext<'_>, block: &IncomingBlock<'_>) -> Result<()> {
        let BlockPayload::Announce(announce) = block.payload else {
            return Err(ThreadError::Decode("expected announce payload".to_string()));
        };
        let author = block.header.author;

        if let Some(contact) = &announce.contact {
            store_contact(ctx, author, contact)?;
        }
        if author != ctx.local && ctx.index.add_peer(&ctx.thread.id, &author)? {
            debug!(thread = %ctx.thread.id, peer = %author.short(), "Peer joined via announce");
        }
        Ok(())
    }
}

pub(crate) fn contact_card(record: &ContactRecord) -> Contact {
    Contact {
        peer_id: record.peer_id,
        username: record.username.clone(),
        avatar: record.avatar.clone(),
        inbox: record.inbox.clone(),
        updated_at: record.updated_at,
    }
}

/// Writes a remote contact card, keyed by the block's author rather than
/// whatever id the card claims. The local contact is never overwritten.
pub(crate) fn store_contact(ctx: &HandlerContext<'_>, author: PeerId, card: &Contact) -> Result<()> {
    if author == ctx.local {
        return Ok(());
    }
    ctx.index.upsert_contact(&ContactRecord {
        peer_id: author,
        username: card.username.clone(),
        avatar: card.avatar.clone(),
        inbox: card.inbox.clone(),
        updated_at: card.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use skein_shared::protocol::BlockHeader;
    use skein_shared::types::{BlockHash, ThreadType};

    use super::*;
    use crate::handlers::tests::record;
    use crate::index::Index;

    fn header(author: PeerId) -> BlockHeader {
        BlockHeader {
            thread_id: "t1".into(),
            block_type: BlockType::Announce,
            author,
            parents: vec![],
            date: 1,
            signature: vec![],
        }
    }

    #[test]
    fn build_requires_own_contact() {
        let index = Index::in_memory().unwrap();
        let me = PeerId([1u8; 32]);
        let thread = record(me, ThreadType::Open);
        let ctx = HandlerContext {
            thread: &thread,
            local: me,
            index: &index,
        };

        let err = AnnounceHandler.build(&ctx, Draft::Announce).unwrap_err();
        assert!(matches!(err, ThreadError::MissingContact));

        index
            .upsert_contact(&ContactRecord {
                peer_id: me,
                username: "alice".to_string(),
                avatar: None,
                inbox: None,
                updated_at: Utc::now(),
            })
            .unwrap();
        let BlockPayload::Announce(a) = AnnounceHandler.build(&ctx, Draft::Announce).unwrap() else {
            panic!("expected announce");
        };
        assert_eq!(a.contact.unwrap().username, "alice");
    }

    #[test]
    fn apply_overwrites_stale_contact_and_adds_peer() {
        let index = Index::in_memory().unwrap();
        let me = PeerId([1u8; 32]);
        let bob = PeerId([2u8; 32]);
        let thread = record(me, ThreadType::Open);
        index.insert_thread(&thread).unwrap();
        index
            .upsert_contact(&ContactRecord {
                peer_id: bob,
                username: "bob-old".to_string(),
                avatar: None,
                inbox: None,
                updated_at: Utc::now(),
            })
            .unwrap();

        let ctx = HandlerContext {
            thread: &thread,
            local: me,
            index: &index,
        };
        let payload = BlockPayload::Announce(Announce {
            contact: Some(Contact {
                peer_id: PeerId([9u8; 32]),
                username: "bob".to_string(),
                avatar: None,
                inbox: Some("http://bob".to_string()),
                updated_at: Utc::now(),
            }),
        });
        let header = header(bob);
        let block = IncomingBlock {
            hash: BlockHash::of(b"announce"),
            header: &header,
            payload: &payload,
        };

        AnnounceHandler.apply(&ctx, &block).unwrap();
        AnnounceHandler.apply(&ctx, &block).unwrap();

        let contact = index.contact(&bob).unwrap().unwrap();
        assert_eq!(contact.username, "bob");
        assert_eq!(contact.inbox.as_deref(), Some("http://bob"));
        assert!(index.contact(&PeerId([9u8; 32])).unwrap().is_none());
        assert_eq!(index.peers(&thread.id).unwrap(), vec![bob]);
    }
}
