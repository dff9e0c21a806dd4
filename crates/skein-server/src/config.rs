//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the daemon can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use skein_core::NodeConfig;
use skein_shared::constants::{
    DEFAULT_DELIVERY_TIMEOUT_SECS, DEFAULT_HTTP_PORT, DEFAULT_MAX_ANCESTOR_DEPTH, MAX_BLOCK_SIZE,
    MAX_PIN_SIZE, PIN_AUDIENCE,
};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:40600`
    pub http_addr: SocketAddr,

    /// Directory holding `index.db`, `blocks/` and `identity.key`.
    /// Env: `REPO_PATH`
    /// Default: `./skein-repo`
    pub repo_path: PathBuf,

    /// Base URL peers reach this node's API on. Advertised as the inbox in
    /// our contact card.
    /// Env: `PUBLIC_URL`
    pub public_url: Option<String>,

    /// Largest wire message accepted on the inbox.
    /// Env: `MAX_BLOCK_SIZE`
    pub max_block_size: usize,

    /// Largest pin request body, and largest stored object.
    /// Env: `MAX_PIN_SIZE`
    pub max_pin_size: usize,

    /// Env: `DELIVERY_TIMEOUT_SECS`
    pub delivery_timeout: Duration,

    /// Env: `MAX_ANCESTOR_DEPTH`
    pub max_ancestor_depth: usize,

    /// Audience a pin token must carry.
    /// Env: `PIN_AUDIENCE`
    pub pin_audience: String,

    /// Thread id or key served at `/threads/default`.
    /// Env: `DEFAULT_THREAD`
    pub default_thread: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            repo_path: PathBuf::from("./skein-repo"),
            public_url: None,
            max_block_size: MAX_BLOCK_SIZE,
            max_pin_size: MAX_PIN_SIZE,
            delivery_timeout: Duration::from_secs(DEFAULT_DELIVERY_TIMEOUT_SECS),
            max_ancestor_depth: DEFAULT_MAX_ANCESTOR_DEPTH,
            pin_audience: PIN_AUDIENCE.to_string(),
            default_thread: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("REPO_PATH") {
            config.repo_path = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("PUBLIC_URL") {
            let url = url.trim().trim_end_matches('/');
            if !url.is_empty() {
                config.public_url = Some(url.to_string());
            }
        }

        if let Some(n) = parse_var("MAX_BLOCK_SIZE") {
            config.max_block_size = n;
        }
        if let Some(n) = parse_var("MAX_PIN_SIZE") {
            config.max_pin_size = n;
        }
        if let Some(secs) = parse_var::<u64>("DELIVERY_TIMEOUT_SECS") {
            config.delivery_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var("MAX_ANCESTOR_DEPTH") {
            config.max_ancestor_depth = n;
        }

        if let Ok(audience) = std::env::var("PIN_AUDIENCE") {
            if !audience.is_empty() {
                config.pin_audience = audience;
            }
        }

        if let Ok(thread) = std::env::var("DEFAULT_THREAD") {
            let thread = thread.trim();
            if !thread.is_empty() {
                config.default_thread = Some(thread.to_string());
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            max_ancestor_depth: self.max_ancestor_depth,
            delivery_timeout: self.delivery_timeout,
            ..NodeConfig::default()
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.repo_path.join("index.db")
    }

    pub fn blocks_path(&self) -> PathBuf {
        self.repo_path.join("blocks")
    }

    pub fn identity_path(&self) -> PathBuf {
        self.repo_path.join("identity.key")
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(%name, %value, "Invalid value, using default");
            None
        }
    }
}
