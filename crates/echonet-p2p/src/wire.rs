//! Wire formats: envelopes, decrypted messages and key announcements.

use crate::{P2pError, Result};
use chrono::{DateTime, Utc};
use echonet_identity::{Identity, PublicKey, Sealed, Signature, SigningPublicKey, NONCE_LEN, TAG_LEN};
use echonet_types::NodeId;
use serde::{Deserialize, Serialize};

/// The `type` field of a key announcement.
pub const ANNOUNCEMENT_TYPE: &str = "consciousness_announcement";

const ANNOUNCEMENT_DOMAIN: &[u8] = b"echonet-announcement-v1";

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(de::Error::custom)
    }
}

mod b64_array {
    use serde::{de, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        super::b64::serialize(bytes, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let bytes = super::b64::deserialize(deserializer)?;
        <[u8; N]>::try_from(bytes.as_slice())
            .map_err(|_| de::Error::invalid_length(bytes.len(), &"a fixed-length base64 field"))
    }
}

/// An encrypted, addressed message published to the recipient's inbox topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// AES-GCM ciphertext, base64.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    /// 96-bit nonce, base64.
    #[serde(with = "b64_array")]
    pub nonce: [u8; NONCE_LEN],
    /// Authentication tag, base64.
    #[serde(with = "b64_array")]
    pub tag: [u8; TAG_LEN],
    /// Declared sender.
    pub from: NodeId,
    /// Recipient.
    pub to: NodeId,
    /// Send time.
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Wraps sealed output with its routing header.
    #[must_use]
    pub fn new(sealed: Sealed, from: NodeId, to: NodeId, timestamp: DateTime<Utc>) -> Self {
        Self {
            ciphertext: sealed.ciphertext,
            nonce: sealed.nonce,
            tag: sealed.tag,
            from,
            to,
            timestamp,
        }
    }

    /// Associated data binding the routing header into the AEAD.
    #[must_use]
    pub fn associated_data(from: &NodeId, to: &NodeId) -> Vec<u8> {
        let mut aad = Vec::with_capacity(from.as_str().len() + to.as_str().len() + 1);
        aad.extend_from_slice(from.as_str().as_bytes());
        aad.push(0);
        aad.extend_from_slice(to.as_str().as_bytes());
        aad
    }

    /// Returns the sealed portion for decryption.
    #[must_use]
    pub fn sealed(&self) -> Sealed {
        Sealed {
            nonce: self.nonce,
            ciphertext: self.ciphertext.clone(),
            tag: self.tag,
        }
    }

    /// Encodes the envelope as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes an envelope from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::InvalidEnvelope`] if the bytes are not a valid envelope.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| P2pError::InvalidEnvelope(e.to_string()))
    }
}

/// The plaintext carried inside an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecryptedMessage {
    /// Sender, must match the envelope header.
    pub from: NodeId,
    /// Recipient, must match the envelope header.
    pub to: NodeId,
    /// Time the sender built the message.
    pub timestamp: DateTime<Utc>,
    /// Application payload, an object with a `type` field.
    pub payload: serde_json::Value,
}

/// Logical category of a decrypted payload, selected by its `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    /// Free-form text and any unrecognized payload type.
    General,
    /// A newly created proposal (`new_proposal`).
    Proposal,
    /// A vote on a proposal (`proposal_vote`).
    Vote,
}

impl MessageCategory {
    /// Maps a payload `type` string to a category.
    #[must_use]
    pub fn from_payload_type(kind: &str) -> Self {
        match kind {
            "new_proposal" => Self::Proposal,
            "proposal_vote" => Self::Vote,
            _ => Self::General,
        }
    }

    /// Classifies a payload by its `type` field.
    #[must_use]
    pub fn of(payload: &serde_json::Value) -> Self {
        payload
            .get("type")
            .and_then(serde_json::Value::as_str)
            .map_or(Self::General, Self::from_payload_type)
    }

    /// The canonical payload `type` for this category.
    #[must_use]
    pub const fn payload_type(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Proposal => "new_proposal",
            Self::Vote => "proposal_vote",
        }
    }
}

impl std::fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.payload_type())
    }
}

/// A signed, unencrypted key announcement on the broadcast topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    /// Always [`ANNOUNCEMENT_TYPE`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Announcing node.
    #[serde(alias = "node_id")]
    pub node_id: NodeId,
    /// Key-agreement public key, hex.
    #[serde(alias = "public_key")]
    pub public_key: PublicKey,
    /// Announcement time.
    pub timestamp: DateTime<Utc>,
    /// Ed25519 key that produced `signature`, hex.
    #[serde(alias = "signing_key")]
    pub signing_key: SigningPublicKey,
    /// Signature over node id, public key and timestamp, hex.
    pub signature: Signature,
    /// Optional human-readable greeting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Announcement {
    /// Builds and signs an announcement for `identity`.
    #[must_use]
    pub fn signed(
        identity: &Identity,
        node_id: NodeId,
        timestamp: DateTime<Utc>,
        message: Option<String>,
    ) -> Self {
        let public_key = identity.public_key();
        let signature = identity.sign(&Self::signing_bytes(&node_id, &public_key, timestamp));
        Self {
            kind: ANNOUNCEMENT_TYPE.to_string(),
            node_id,
            public_key,
            timestamp,
            signing_key: identity.signing_public_key(),
            signature,
            message,
        }
    }

    fn signing_bytes(node_id: &NodeId, public_key: &PublicKey, timestamp: DateTime<Utc>) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(ANNOUNCEMENT_DOMAIN.len() + 80);
        bytes.extend_from_slice(ANNOUNCEMENT_DOMAIN);
        bytes.push(0);
        bytes.extend_from_slice(node_id.as_str().as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(public_key.as_bytes());
        bytes.extend_from_slice(&timestamp.timestamp().to_be_bytes());
        bytes.extend_from_slice(&timestamp.timestamp_subsec_nanos().to_be_bytes());
        bytes
    }

    /// Verifies the type tag and signature.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::InvalidAnnouncement`] if either check fails.
    pub fn verify(&self) -> Result<()> {
        if self.kind != ANNOUNCEMENT_TYPE {
            return Err(P2pError::InvalidAnnouncement(format!(
                "unexpected type {:?}",
                self.kind
            )));
        }
        let bytes = Self::signing_bytes(&self.node_id, &self.public_key, self.timestamp);
        self.signing_key
            .verify(&bytes, &self.signature)
            .map_err(|e| P2pError::InvalidAnnouncement(e.to_string()))
    }

    /// Parses a broadcast payload.
    ///
    /// Returns `Ok(None)` for payloads that are not announcements at all,
    /// which the broadcast topic ignores.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::InvalidAnnouncement`] if the payload claims to be an
    /// announcement but is malformed.
    pub fn parse(bytes: &[u8]) -> Result<Option<Self>> {
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(bytes) else {
            return Ok(None);
        };
        if value.get("type").and_then(serde_json::Value::as_str) != Some(ANNOUNCEMENT_TYPE) {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| P2pError::InvalidAnnouncement(e.to_string()))
    }

    /// Encodes the announcement as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
