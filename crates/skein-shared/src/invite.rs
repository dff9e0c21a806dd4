use chrono::{DateTime, Utc};
use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};

use crate::crypto::{self, SymmetricKey};
use crate::identity::{self, Identity};
use crate::protocol::{Contact, ThreadSeed};
use crate::types::{BlockHash, PeerId};

const INVITE_CONTEXT: &[u8] = b"skein/invite";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitePayload {
    pub thread: ThreadSeed,
    pub inviter: PeerId,
    /// Thread head when the invite was sealed. The invitee pulls history
    /// from here.
    pub head: Option<BlockHash>,
    /// How to reach the inviter.
    pub contact: Option<Contact>,
    pub created_at: DateTime<Utc>,
}

/// An external invite: the thread seed signed by the inviter and encrypted
/// under a one-time key. The ciphertext lives in the content store; its hash
/// plus the one-time key are the credentials handed out of band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedInvite {
    pub payload: InvitePayload,
    pub signature: Vec<u8>,
}

impl SealedInvite {
    /// Create a new signed invite.
    pub fn create(
        identity: &Identity,
        thread: ThreadSeed,
        head: Option<BlockHash>,
        contact: Option<Contact>,
    ) -> Result<Self, InviteError> {
        let payload = InvitePayload {
            thread,
            inviter: identity.peer_id(),
            head,
            contact,
            created_at: Utc::now(),
        };

        let payload_bytes =
            bincode::serialize(&payload).map_err(|_| InviteError::InvalidFormat)?;
        let signature = identity.sign(&payload_bytes);

        Ok(Self {
            payload,
            signature: signature.to_bytes().to_vec(),
        })
    }

    /// Encrypt under a fresh one-time key. Returns `(ciphertext, key)`.
    pub fn seal(&self) -> Result<(Vec<u8>, SymmetricKey), InviteError> {
        let key = crypto::generate_symmetric_key();
        let bytes = bincode::serialize(self).map_err(|_| InviteError::InvalidFormat)?;
        let ciphertext = crypto::seal(&key, INVITE_CONTEXT, &bytes).map_err(|_| InviteError::InvalidFormat)?;
        Ok((ciphertext, key))
    }

    /// Decrypt a sealed invite and verify the inviter's signature.
    pub fn open(ciphertext: &[u8], key: &SymmetricKey) -> Result<Self, InviteError> {
        let bytes = crypto::open(key, INVITE_CONTEXT, ciphertext).map_err(|_| InviteError::WrongKey)?;
        let invite: Self = bincode::deserialize(&bytes).map_err(|_| InviteError::InvalidFormat)?;
        invite.verify()?;
        Ok(invite)
    }

    /// Verify the token's signature.
    pub fn verify(&self) -> Result<(), InviteError> {
        let payload_bytes =
            bincode::serialize(&self.payload).map_err(|_| InviteError::InvalidFormat)?;

        Signature::from_slice(&self.signature).map_err(|_| InviteError::InvalidSignature)?;
        identity::verify_signature(&self.payload.inviter, &payload_bytes, &self.signature)
            .map_err(|_| InviteError::InvalidSignature)
    }
}

/// Out-of-band credentials for an external invite.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct InviteCode {
    pub id: BlockHash,
    pub key: SymmetricKey,
}

impl InviteCode {
    /// Encode as a base64url string (copiable code).
    pub fn encode(&self) -> Result<String, InviteError> {
        let bytes = bincode::serialize(self).map_err(|_| InviteError::InvalidFormat)?;
        Ok(base64_url_encode(&bytes))
    }

    /// Decode a base64url string back into credentials.
    pub fn decode(code: &str) -> Result<Self, InviteError> {
        let bytes = base64_url_decode(code)?;
        bincode::deserialize(&bytes).map_err(|_| InviteError::InvalidFormat)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InviteError {
    #[error("Invalid invite format")]
    InvalidFormat,

    #[error("Invite key does not open this invite")]
    WrongKey,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Base64 decode error")]
    Base64Decode,
}

pub(crate) fn base64_url_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    URL_SAFE_NO_PAD.encode(data)
}

pub(crate) fn base64_url_decode(s: &str) -> Result<Vec<u8>, InviteError> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    URL_SAFE_NO_PAD
        .decode(s.trim())
        .map_err(|_| InviteError::Base64Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ThreadId, ThreadType};

    fn seed(owner: &Identity) -> ThreadSeed {
        ThreadSeed {
            id: ThreadId::new(),
            name: "holiday".to_string(),
            thread_type: ThreadType::Open,
            schema: None,
            owner: owner.peer_id(),
            key: crypto::generate_symmetric_key(),
        }
    }

    #[test]
    fn test_seal_open() {
        let identity = Identity::generate();
        let thread = seed(&identity);
        let head = Some(BlockHash::of(b"head"));
        let invite = SealedInvite::create(&identity, thread.clone(), head, None).unwrap();

        let (ciphertext, key) = invite.seal().unwrap();
        let opened = SealedInvite::open(&ciphertext, &key).expect("open should work");

        assert_eq!(opened.payload.thread, thread);
        assert_eq!(opened.payload.inviter, identity.peer_id());
        assert_eq!(opened.payload.head, Some(BlockHash::of(b"head")));
    }

    #[test]
    fn test_wrong_key_fails() {
        let identity = Identity::generate();
        let invite = SealedInvite::create(&identity, seed(&identity), None, None).unwrap();
        let (ciphertext, _) = invite.seal().unwrap();

        let err = SealedInvite::open(&ciphertext, &crypto::generate_symmetric_key()).unwrap_err();
        assert!(matches!(err, InviteError::WrongKey));
    }

    #[test]
    fn test_tampered_fails() {
        let identity = Identity::generate();
        let mut invite = SealedInvite::create(&identity, seed(&identity), None, None).unwrap();
        invite.payload.thread.name = "hacked".to_string();
        assert!(invite.verify().is_err());
    }

    #[test]
    fn test_code_roundtrip() {
        let code = InviteCode {
            id: BlockHash::of(b"invite"),
            key: [7u8; 32],
        };
        let text = code.encode().unwrap();
        assert_eq!(InviteCode::decode(&text).unwrap(), code);
        assert!(InviteCode::decode("!!!").is_err());
    }
}
