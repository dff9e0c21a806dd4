//! # skein-server
//!
//! Daemon hosting a skein node behind an HTTP API.
//!
//! This binary provides:
//! - **Thread API** for creating threads, adding blocks, inviting peers and
//!   following thread updates
//! - **Peer inbox** where other nodes push blocks and invites
//! - **Object serving** so peers can backfill blocks they are missing
//! - **Pinning** of raw objects and tarballs under a node-issued bearer token

mod api;
mod config;
mod error;
mod pin;
mod transport;
mod updates;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use skein_core::{FsBlockStore, Index, Node};
use skein_shared::identity::Identity;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::transport::{HttpTransport, PeerFetchStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,skein_server=debug,skein_core=debug")),
        )
        .init();

    info!("Starting skein node v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the repo
    // -----------------------------------------------------------------------
    tokio::fs::create_dir_all(&config.repo_path).await?;

    let identity = Identity::load_or_generate(&config.identity_path())?;
    let peer_id = identity.peer_id();
    let index = Index::open(&config.index_path())?;

    let blocks = Arc::new(FsBlockStore::new(config.blocks_path(), config.max_pin_size).await?);
    let store = PeerFetchStore::new(
        Arc::clone(&blocks),
        index.clone(),
        peer_id,
        config.delivery_timeout,
    )?;
    let transport = HttpTransport::new(index.clone(), peer_id, config.delivery_timeout)?;

    let node = Node::new(
        identity,
        Arc::new(store),
        index,
        Arc::new(transport),
        config.node_config(),
    )?;

    // Keep the advertised inbox in step with where we are reachable.
    if let Some(url) = &config.public_url {
        if let Some(profile) = node.profile()? {
            if profile.inbox.as_deref() != Some(url.as_str()) {
                node.set_profile(&profile.username, profile.avatar, Some(url.clone()))?;
                info!(inbox = %url, "Updated profile inbox");
            }
        }
    }
    info!(peer_id = %peer_id, repo = %config.repo_path.display(), "Node ready");

    let http_addr = config.http_addr;
    let app_state = AppState {
        node: Arc::new(node),
        blocks,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
