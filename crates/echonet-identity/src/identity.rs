//! Ephemeral node identity.

use crate::{IdentityError, PublicKey, Result, Signature, SigningPublicKey};
use curve25519_dalek::MontgomeryPoint;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

/// A node's key material for the lifetime of the process.
///
/// The X25519 secret used for key agreement and the Ed25519 signing key are
/// never exposed or serialized.
pub struct Identity {
    agreement_secret: Zeroizing<[u8; 32]>,
    public_key: PublicKey,
    signing_key: SigningKey,
}

impl Identity {
    /// Generates a fresh identity from operating-system randomness.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::KeyGeneration`] if the OS random source fails.
    /// The node cannot participate without an identity.
    pub fn generate() -> Result<Self> {
        let mut agreement_secret = Zeroizing::new([0u8; 32]);
        let mut signing_seed = Zeroizing::new([0u8; 32]);
        OsRng
            .try_fill_bytes(agreement_secret.as_mut())
            .map_err(|e| IdentityError::KeyGeneration(e.to_string()))?;
        OsRng
            .try_fill_bytes(signing_seed.as_mut())
            .map_err(|e| IdentityError::KeyGeneration(e.to_string()))?;

        Ok(Self::from_secrets(&agreement_secret, &signing_seed))
    }

    /// Rebuilds an identity from raw secret bytes.
    ///
    /// Intended for deterministic tests and fuzzing.
    #[must_use]
    pub fn from_secrets(agreement_secret: &[u8; 32], signing_seed: &[u8; 32]) -> Self {
        let public = MontgomeryPoint::mul_base_clamped(*agreement_secret);
        Self {
            agreement_secret: Zeroizing::new(*agreement_secret),
            public_key: PublicKey::from_array(public.to_bytes()),
            signing_key: SigningKey::from_bytes(signing_seed),
        }
    }

    /// Returns the key-agreement public key announced to peers.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Returns the key that verifies this identity's announcement signatures.
    #[must_use]
    pub fn signing_public_key(&self) -> SigningPublicKey {
        SigningPublicKey::from_verifying_key(self.signing_key.verifying_key())
    }

    /// Signs a message with the announcement key.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature::from_bytes(self.signing_key.sign(message).to_bytes())
    }

    /// Performs X25519 key agreement with a peer's public key.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidPublicKey`] if the peer key is a
    /// low-order point and the shared secret would be all zeros.
    pub fn agree(&self, peer: &PublicKey) -> Result<Zeroizing<[u8; 32]>> {
        let shared = MontgomeryPoint(*peer.as_bytes()).mul_clamped(*self.agreement_secret);
        let shared = Zeroizing::new(shared.to_bytes());
        if *shared == [0u8; 32] {
            return Err(IdentityError::InvalidPublicKey(
                "low-order point in key agreement".into(),
            ));
        }
        Ok(shared)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}
