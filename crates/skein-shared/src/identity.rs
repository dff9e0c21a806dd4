use std::path::Path;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::IdentityError;
use crate::types::PeerId;

/// A peer's cryptographic identity based on Ed25519.
/// The public key serves as the peer id.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore identity from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        Self { signing_key }
    }

    /// Load the identity stored at `path`, creating a fresh one if the file
    /// does not exist yet. The file holds the hex-encoded 32-byte secret.
    pub fn load_or_generate(path: &Path) -> Result<Self, IdentityError> {
        if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| IdentityError::KeyFile(e.to_string()))?;
            let bytes =
                hex::decode(text.trim()).map_err(|e| IdentityError::KeyFile(e.to_string()))?;
            let secret: [u8; 32] = bytes
                .try_into()
                .map_err(|_| IdentityError::InvalidKeyBytes)?;
            return Ok(Self::from_secret_bytes(&secret));
        }

        let identity = Self::generate();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IdentityError::KeyFile(e.to_string()))?;
        }
        std::fs::write(path, hex::encode(identity.secret_bytes()))
            .map_err(|e| IdentityError::KeyFile(e.to_string()))?;
        Ok(identity)
    }

    /// Get the peer id (public key)
    pub fn peer_id(&self) -> PeerId {
        PeerId(self.signing_key.verifying_key().to_bytes())
    }

    /// Get the raw public key bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Get the raw secret key bytes
    pub fn secret_bytes(&self) -> &[u8; 32] {
        self.signing_key.as_bytes()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Get the verifying (public) key
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("peer_id", &self.peer_id().short())
            .finish()
    }
}

/// Resolve a peer id to its verifying key.
pub fn verifying_key(peer: &PeerId) -> Result<VerifyingKey, IdentityError> {
    VerifyingKey::from_bytes(&peer.0).map_err(|_| IdentityError::InvalidKeyBytes)
}

/// Verify a detached signature made by `peer` over `message`.
pub fn verify_signature(
    peer: &PeerId,
    message: &[u8],
    signature: &[u8],
) -> Result<(), IdentityError> {
    let key = verifying_key(peer)?;
    let signature = Signature::from_slice(signature).map_err(|_| IdentityError::BadSignature)?;
    key.verify(message, &signature)
        .map_err(|_| IdentityError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_generation() {
        let id = Identity::generate();
        assert_eq!(id.peer_id().0, id.public_key_bytes());
    }

    #[test]
    fn test_secret_roundtrip() {
        let id = Identity::generate();
        let restored = Identity::from_secret_bytes(id.secret_bytes());
        assert_eq!(id.peer_id(), restored.peer_id());
    }

    #[test]
    fn test_sign_verify() {
        let id = Identity::generate();
        let message = b"Hello, skein!";
        let signature = id.sign(message).to_bytes();

        assert!(verify_signature(&id.peer_id(), message, &signature).is_ok());

        // Wrong message should fail
        assert!(matches!(
            verify_signature(&id.peer_id(), b"wrong", &signature),
            Err(IdentityError::BadSignature)
        ));
    }

    #[test]
    fn test_load_or_generate_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");

        let first = Identity::load_or_generate(&path).unwrap();
        let second = Identity::load_or_generate(&path).unwrap();
        assert_eq!(first.peer_id(), second.peer_id());
    }
}
