//! Symmetric sealing for block bodies and invites.
//!
//! Sealed data is `nonce || ciphertext` under XChaCha20-Poly1305. Every seal
//! is bound to a context string as associated data, so a body copied into
//! another thread, or an invite passed off as a block, fails to open.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::constants::NONCE_SIZE;
use crate::error::CryptoError;

pub type SymmetricKey = [u8; 32];

/// Fresh random key, one per thread or per external invite.
pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

pub fn seal(key: &SymmetricKey, context: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let sealed = XChaCha20Poly1305::new(key.into())
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: context,
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + sealed.len());
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&sealed);
    Ok(output)
}

pub fn open(key: &SymmetricKey, context: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }
    let (nonce, sealed) = data.split_at(NONCE_SIZE);

    XChaCha20Poly1305::new(key.into())
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: sealed,
                aad: context,
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Parse the hex form a thread key is persisted in.
pub fn key_from_hex(s: &str) -> Result<SymmetricKey, CryptoError> {
    let bytes = hex::decode(s.trim()).map_err(|_| CryptoError::InvalidKeyLength)?;
    bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength)
}
