//! HTTP plumbing between peers.
//!
//! Blocks are pushed to a peer's `/api/v0/inbox`; objects missing locally
//! are pulled from `/api/v0/blocks/:hash` of known contacts. A contact's
//! `inbox` field holds the base URL of its API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use skein_core::{BlockStore, FsBlockStore, Index, PeerTransport, ThreadError, TransportError};
use skein_shared::constants::{HTTP_API_VERSION, PEER_HEADER};
use skein_shared::types::{BlockHash, PeerId};

fn client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build()
}

fn api_url(base: &str, path: &str) -> String {
    format!(
        "{}/api/{}/{}",
        base.trim_end_matches('/'),
        HTTP_API_VERSION,
        path
    )
}

/// Delivers wire messages by POSTing them to the recipient's inbox.
pub struct HttpTransport {
    client: reqwest::Client,
    index: Index,
    local: PeerId,
}

impl HttpTransport {
    pub fn new(index: Index, local: PeerId, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: client(timeout)?,
            index,
            local,
        })
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn send(&self, peer: &PeerId, data: Vec<u8>) -> Result<(), TransportError> {
        let inbox = self
            .index
            .contact(peer)
            .map_err(|e| TransportError::Unreachable(e.to_string()))?
            .and_then(|c| c.inbox)
            .ok_or_else(|| TransportError::Unreachable(format!("no inbox for {}", peer.short())))?;

        let response = self
            .client
            .post(api_url(&inbox, "inbox"))
            .header(PEER_HEADER, self.local.to_hex())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected(format!("{status}: {body}")));
        }
        Ok(())
    }
}

/// Local filesystem store that falls back to asking known contacts for
/// objects it does not hold, keeping whatever it fetches.
pub struct PeerFetchStore {
    local: Arc<FsBlockStore>,
    client: reqwest::Client,
    index: Index,
    me: PeerId,
}

impl PeerFetchStore {
    pub fn new(
        local: Arc<FsBlockStore>,
        index: Index,
        me: PeerId,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        Ok(Self {
            local,
            client: client(timeout)?,
            index,
            me,
        })
    }

    async fn fetch_remote(&self, base: &str, hash: &BlockHash) -> Option<Vec<u8>> {
        let url = api_url(base, &format!("blocks/{}", hash.to_hex()));
        let response = match self.client.get(&url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!(%url, status = %r.status(), "Peer does not have object");
                return None;
            }
            Err(e) => {
                debug!(%url, "Peer fetch failed: {}", e);
                return None;
            }
        };
        let data = response.bytes().await.ok()?;
        if BlockHash::of(&data) != *hash {
            warn!(%url, "Peer served bytes that do not match the requested hash");
            return None;
        }
        Some(data.to_vec())
    }
}

#[async_trait]
impl BlockStore for PeerFetchStore {
    async fn store(&self, data: &[u8]) -> skein_core::Result<BlockHash> {
        self.local.store(data).await
    }

    async fn fetch(&self, hash: &BlockHash) -> skein_core::Result<Vec<u8>> {
        match self.local.fetch(hash).await {
            Err(ThreadError::NotFound(_)) => {}
            other => return other,
        }

        for contact in self.index.contacts()? {
            if contact.peer_id == self.me {
                continue;
            }
            let Some(base) = contact.inbox.as_deref() else {
                continue;
            };
            if let Some(data) = self.fetch_remote(base, hash).await {
                self.local.store(&data).await?;
                debug!(hash = %hash.short(), from = %contact.peer_id.short(), "Fetched object from peer");
                return Ok(data);
            }
        }
        Err(ThreadError::NotFound(*hash))
    }

    async fn has(&self, hash: &BlockHash) -> skein_core::Result<bool> {
        self.local.has(hash).await
    }
}
