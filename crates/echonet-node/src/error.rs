//! Node error types.

use echonet_consensus::ConsensusError;
use echonet_identity::IdentityError;
use echonet_p2p::P2pError;
use thiserror::Error;

/// Errors returned by [`EchoNode`](crate::EchoNode) operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Messaging or transport failure.
    #[error(transparent)]
    P2p(#[from] P2pError),

    /// Proposal or vote rejected by the consensus engine.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    /// Key material could not be created.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// An outbound message was rejected before sending.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Node settings are unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl NodeError {
    /// Stable machine-readable reason code.
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::P2p(e) => e.reason_code(),
            Self::Consensus(e) => e.reason_code(),
            Self::Identity(IdentityError::KeyGeneration(_)) => "key_generation_failure",
            Self::Identity(_) => "crypto_error",
            Self::InvalidMessage(_) => "invalid_message",
            Self::Config(_) => "invalid_configuration",
        }
    }
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
