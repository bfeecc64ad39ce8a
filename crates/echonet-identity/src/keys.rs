//! Public key and signature types exchanged in announcements.

use crate::{IdentityError, Result};
use ed25519_dalek::{Verifier, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

fn fixed<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N]> {
    <[u8; N]>::try_from(bytes).map_err(|_| {
        IdentityError::InvalidPublicKey(format!(
            "{what}: expected {N} bytes, got {}",
            bytes.len()
        ))
    })
}

fn serialize_hex<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    if serializer.is_human_readable() {
        serializer.serialize_str(&hex::encode(bytes))
    } else {
        serializer.serialize_bytes(bytes)
    }
}

fn deserialize_hex<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
    if deserializer.is_human_readable() {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    } else {
        Vec::<u8>::deserialize(deserializer)
    }
}

/// An X25519 public key used for session-key agreement.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Encoded key length.
    pub const LEN: usize = 32;

    /// Parses a 32-byte X25519 point.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not 32 bytes or is the all-zero point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr = fixed::<32>(bytes, "x25519 key")?;
        if arr == [0u8; 32] {
            return Err(IdentityError::InvalidPublicKey(
                "x25519 key: all-zero point".into(),
            ));
        }
        Ok(Self(arr))
    }

    /// Parses a hex-encoded public key.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or not a valid key.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| IdentityError::InvalidPublicKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Returns the raw bytes of this key.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the key as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Leading 8 bytes in hex, for logs.
    #[must_use]
    pub fn short_id(&self) -> String {
        hex::encode(&self.0[..8])
    }

    pub(crate) const fn from_array(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.short_id())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serialize_hex(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes = deserialize_hex(deserializer)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// An Ed25519 verifying key used to check announcement signatures.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SigningPublicKey {
    key: VerifyingKey,
}

impl SigningPublicKey {
    pub(crate) fn from_verifying_key(key: VerifyingKey) -> Self {
        Self { key }
    }

    /// Creates a verifying key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid Ed25519 point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr = fixed::<32>(bytes, "ed25519 key")?;
        let key = VerifyingKey::from_bytes(&arr)
            .map_err(|e| IdentityError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { key })
    }

    /// Returns the raw bytes of this key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.key.as_bytes()
    }

    /// Checks `signature` over `message` under this key.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidSignature`] if the signature does not verify.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
        self.key
            .verify(message, &sig)
            .map_err(|_| IdentityError::InvalidSignature)
    }
}

impl fmt::Debug for SigningPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningPublicKey({})", hex::encode(&self.as_bytes()[..8]))
    }
}

impl Serialize for SigningPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serialize_hex(self.as_bytes(), serializer)
    }
}

impl<'de> Deserialize<'de> for SigningPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes = deserialize_hex(deserializer)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// An Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; 64]);

impl Signature {
    /// Encoded signature length.
    pub const LEN: usize = 64;

    /// Wraps a raw 64-byte signature.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Parses a 64-byte signature, rejecting other lengths.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidSignature`] if the slice is not 64 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        <[u8; 64]>::try_from(bytes)
            .map(Self)
            .map_err(|_| IdentityError::InvalidSignature)
    }

    /// Raw signature bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", hex::encode(&self.0[..8]))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serialize_hex(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes = deserialize_hex(deserializer)?;
        Self::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Identity;
    use pretty_assertions::assert_eq;

    #[test]
    fn public_key_hex_roundtrip() {
        let id = Identity::generate().unwrap();
        let pk = id.public_key();

        let parsed = PublicKey::from_hex(&pk.to_hex()).unwrap();
        assert_eq!(parsed, pk);
        assert_eq!(pk.short_id().len(), 16);
    }

    #[test]
    fn public_key_rejects_bad_lengths_and_zero() {
        assert!(PublicKey::from_bytes(&[1u8; 31]).is_err());
        assert!(PublicKey::from_bytes(&[0u8; 32]).is_err());
        assert!(PublicKey::from_hex("zz").is_err());
    }

    #[test]
    fn keys_serde_as_hex_strings() {
        let id = Identity::generate().unwrap();

        let json = serde_json::to_string(&id.public_key()).unwrap();
        assert_eq!(json, format!("\"{}\"", id.public_key().to_hex()));

        let vk: SigningPublicKey =
            serde_json::from_str(&serde_json::to_string(&id.signing_public_key()).unwrap())
                .unwrap();
        assert_eq!(vk, id.signing_public_key());
    }

    #[test]
    fn signature_wrong_length() {
        assert_eq!(
            Signature::from_slice(&[0u8; 10]),
            Err(IdentityError::InvalidSignature)
        );
    }
}
