/// Protocol identifier, also the audience of pin tokens
pub const PROTOCOL_VERSION: &str = "/skein/1.0.0";

/// Audience expected in bearer tokens presented to the pin endpoint
pub const PIN_AUDIENCE: &str = "/skein/cafe/1.0.0";

/// HTTP API version segment
pub const HTTP_API_VERSION: &str = "v0";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Maximum serialized block size in bytes (1 MiB)
pub const MAX_BLOCK_SIZE: usize = 1024 * 1024;

/// Maximum pinned object size in bytes (50 MiB)
pub const MAX_PIN_SIZE: usize = 50 * 1024 * 1024;

/// How many missing ancestors a single incoming block may pull in
pub const DEFAULT_MAX_ANCESTOR_DEPTH: usize = 1024;

/// How far past its parents a remote block's logical date may jump
pub const MAX_DATE_SKEW: u64 = 1024;

/// Seconds a peer's delivery worker idles before exiting
pub const DEFAULT_PEER_IDLE_SECS: u64 = 300;

/// Updates buffered per subscriber
pub const DEFAULT_UPDATE_CAPACITY: usize = 1024;

/// Per-peer delivery timeout in seconds
pub const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 10;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 40600;

/// Header carrying the sending peer id on inbox deliveries
pub const PEER_HEADER: &str = "x-skein-peer";
