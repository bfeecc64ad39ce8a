//! Session keys and AES-256-GCM sealing.
//!
//! Each peer pair shares one X25519 secret. Two directional keys are derived
//! from it with BLAKE3 so that the two ends never encrypt under the same key,
//! which keeps per-sender nonce counters unique per key.

use crate::{Identity, IdentityError, PublicKey, Result};
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Length of an AES-GCM nonce in bytes.
pub const NONCE_LEN: usize = 12;

/// Length of an AES-GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

const SESSION_KEY_CONTEXT: &str = "echonet 2026-01-01 session key v1";

/// A 256-bit symmetric key for one direction of a peer session.
#[derive(Clone, Zeroize, ZeroizeOnDrop, PartialEq, Eq)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derives the key for traffic from `sender` to `recipient`.
    #[must_use]
    pub fn derive(shared_secret: &[u8; 32], sender: &PublicKey, recipient: &PublicKey) -> Self {
        let mut material = Zeroizing::new([0u8; 96]);
        material[..32].copy_from_slice(shared_secret);
        material[32..64].copy_from_slice(sender.as_bytes());
        material[64..].copy_from_slice(recipient.as_bytes());
        Self(blake3::derive_key(SESSION_KEY_CONTEXT, material.as_ref()))
    }

    /// Encrypts `plaintext` under this key.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Encryption`] if the cipher rejects the input.
    pub fn seal(&self, nonce: [u8; NONCE_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Sealed> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0));
        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), aad, &mut buffer)
            .map_err(|e| IdentityError::Encryption(e.to_string()))?;

        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(tag.as_slice());

        Ok(Sealed {
            nonce,
            ciphertext: buffer,
            tag: tag_bytes,
        })
    }

    /// Decrypts and authenticates a sealed message.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::AuthenticationFailure`] if the tag does not
    /// verify for this key, nonce and associated data.
    pub fn open(&self, sealed: &Sealed, aad: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0));
        let mut buffer = sealed.ciphertext.clone();
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&sealed.nonce),
                aad,
                &mut buffer,
                Tag::from_slice(&sealed.tag),
            )
            .map_err(|_| IdentityError::AuthenticationFailure("tag mismatch".into()))?;
        Ok(buffer)
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// The pair of directional keys shared with one peer.
#[derive(Debug, Clone)]
pub struct SessionKeys {
    /// Key for messages this node sends to the peer.
    pub outbound: SessionKey,
    /// Key for messages the peer sends to this node.
    pub inbound: SessionKey,
}

impl SessionKeys {
    /// Derives both directional keys for `peer`.
    ///
    /// Deterministic: the same identity and peer key always produce the same
    /// keys, and the peer derives the mirrored pair.
    ///
    /// # Errors
    ///
    /// Returns an error if key agreement with `peer` fails.
    pub fn derive(identity: &Identity, peer: &PublicKey) -> Result<Self> {
        let shared = identity.agree(peer)?;
        let own = identity.public_key();
        Ok(Self {
            outbound: SessionKey::derive(&shared, &own, peer),
            inbound: SessionKey::derive(&shared, peer, &own),
        })
    }
}

/// The output of a seal operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// 64-bit big-endian counter followed by 32 random bits.
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext without the tag.
    pub ciphertext: Vec<u8>,
    /// AES-GCM authentication tag.
    pub tag: [u8; TAG_LEN],
}

impl Sealed {
    /// Returns the counter portion of the nonce.
    #[must_use]
    pub fn counter(&self) -> u64 {
        let mut counter = [0u8; 8];
        counter.copy_from_slice(&self.nonce[..8]);
        u64::from_be_bytes(counter)
    }
}
