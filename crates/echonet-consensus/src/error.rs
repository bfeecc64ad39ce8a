//! Consensus error types.

use crate::{ProposalId, ProposalStatus};
use echonet_types::NodeId;
use thiserror::Error;

/// Errors that can occur during consensus operations.
///
/// A failed operation never mutates the proposal it targeted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// The proposal is not in the active set.
    #[error("proposal not found: {0}")]
    ProposalNotFound(ProposalId),

    /// The proposal passed its deadline; no vote was recorded.
    #[error("proposal expired: {0}")]
    ProposalExpired(ProposalId),

    /// The vote kind is not one of the four echo kinds.
    #[error("invalid vote: {0}")]
    InvalidVote(String),

    /// The proposal is malformed.
    #[error("invalid proposal: {0}")]
    InvalidProposal(String),

    /// Only the proposer may withdraw a proposal.
    #[error("{requester} is not the proposer of {id}")]
    NotProposer {
        /// Target proposal.
        id: ProposalId,
        /// Node that asked.
        requester: NodeId,
    },

    /// The requested status change is not allowed.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current status.
        from: ProposalStatus,
        /// Requested status.
        to: ProposalStatus,
    },
}

impl ConsensusError {
    /// Stable machine-readable reason code.
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::ProposalNotFound(_) => "proposal_not_found",
            Self::ProposalExpired(_) => "proposal_expired",
            Self::InvalidVote(_) => "invalid_vote",
            Self::InvalidProposal(_) => "invalid_proposal",
            Self::NotProposer { .. } => "not_proposer",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
        }
    }
}

/// A specialized Result type for consensus operations.
pub type Result<T> = std::result::Result<T, ConsensusError>;
