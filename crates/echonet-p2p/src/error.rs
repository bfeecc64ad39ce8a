//! P2P error types.

use echonet_identity::IdentityError;
use echonet_types::NodeId;
use thiserror::Error;

/// Errors that can occur during routing and transport operations.
#[derive(Debug, Error)]
pub enum P2pError {
    /// No directory entry exists for the node.
    #[error("peer unknown: {0}")]
    PeerUnknown(NodeId),

    /// The envelope failed authentication and was discarded.
    #[error("authentication failure from {from}: {reason}")]
    AuthenticationFailure {
        /// Declared sender of the envelope.
        from: NodeId,
        /// What failed.
        reason: String,
    },

    /// The router is not connected.
    #[error("not connected")]
    NotConnected,

    /// The router is already connected or connecting.
    #[error("already connected")]
    AlreadyConnected,

    /// The transport collaborator failed.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// An envelope could not be decoded.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// An announcement was malformed or its signature did not verify.
    #[error("invalid announcement: {0}")]
    InvalidAnnouncement(String),

    /// Key material error.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Payload serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl P2pError {
    /// Stable machine-readable reason code.
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::PeerUnknown(_) => "peer_unknown",
            Self::AuthenticationFailure { .. }
            | Self::Identity(IdentityError::AuthenticationFailure(_)) => "authentication_failure",
            Self::NotConnected => "not_connected",
            Self::AlreadyConnected => "already_connected",
            Self::TransportUnavailable(_) => "transport_unavailable",
            Self::InvalidEnvelope(_) => "invalid_envelope",
            Self::InvalidAnnouncement(_) => "invalid_announcement",
            Self::Identity(IdentityError::KeyGeneration(_)) => "key_generation_failure",
            Self::Identity(_) => "crypto_error",
            Self::Serialization(_) => "serialization",
        }
    }
}

/// A specialized Result type for P2P operations.
pub type Result<T> = std::result::Result<T, P2pError>;
