use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Signature verification failed")]
    BadSignature,

    #[error("Key file error: {0}")]
    KeyFile(String),
}
