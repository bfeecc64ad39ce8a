//! Error types for identity and channel operations.

use thiserror::Error;

/// Errors that can occur during identity and channel operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The operating system could not supply key material.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// A public key is malformed or unusable for key agreement.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// A signature is malformed or does not verify.
    #[error("signature verification failed")]
    InvalidSignature,

    /// The AEAD tag did not verify, or the nonce was replayed.
    ///
    /// The plaintext is never returned in this case.
    #[error("authentication failure: {0}")]
    AuthenticationFailure(String),

    /// Encryption itself failed.
    #[error("encryption failed: {0}")]
    Encryption(String),
}

/// A specialized Result type for identity operations.
pub type Result<T> = std::result::Result<T, IdentityError>;
