//! Application payloads carried inside encrypted envelopes.

use echonet_consensus::{Proposal, ProposalId};
use echonet_types::NodeId;
use serde::{Deserialize, Serialize};

/// Payload announcing a newly created proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProposal {
    /// Always `new_proposal`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The proposal as created by its proposer.
    pub proposal: Proposal,
}

impl NewProposal {
    /// Wraps `proposal`.
    #[must_use]
    pub fn new(proposal: Proposal) -> Self {
        Self {
            kind: "new_proposal".into(),
            proposal,
        }
    }
}

/// Payload carrying one vote.
///
/// `vote` stays a string so unknown kinds can be rejected with a typed error
/// by the receiver rather than failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalVote {
    /// Always `proposal_vote`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Target proposal.
    pub proposal_id: ProposalId,
    /// Voting node.
    pub voter: NodeId,
    /// Echo kind name.
    pub vote: String,
    /// Free-form commentary.
    #[serde(default)]
    pub commentary: String,
}

impl ProposalVote {
    /// Builds a vote payload.
    #[must_use]
    pub fn new(proposal_id: ProposalId, voter: NodeId, vote: &str, commentary: &str) -> Self {
        Self {
            kind: "proposal_vote".into(),
            proposal_id,
            voter,
            vote: vote.to_string(),
            commentary: commentary.to_string(),
        }
    }
}

/// Payload of a free-form text message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralMessage {
    /// Payload type; `general` unless the sender chose another label.
    #[serde(rename = "type")]
    pub kind: String,
    /// Message text.
    #[serde(default)]
    pub content: String,
    /// Sender tag of the form `<node id>_<timestamp>`.
    #[serde(default)]
    pub signature: String,
}

/// Payload types reserved for proposal traffic.
pub const RESERVED_TYPES: [&str; 2] = ["new_proposal", "proposal_vote"];
