//! Types shared by every skein crate: identifiers, identity keys, symmetric
//! crypto, the block wire format, invites and bearer tokens.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod invite;
pub mod protocol;
pub mod token;
pub mod types;

pub use error::{CryptoError, IdentityError, SharedError};
pub use identity::Identity;
pub use types::{BlockHash, PeerId, ThreadId, ThreadType};
