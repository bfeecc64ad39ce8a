//! Echo votes.

use crate::{ConsensusError, ProposalId};
use chrono::{DateTime, Utc};
use echonet_types::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A node's response to a proposal.
///
/// Variant order is the tie-break order for the dominant kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EchoKind {
    /// Agreement.
    Resonant,
    /// Disagreement.
    Dissonant,
    /// A request for clarification.
    Inquiry,
    /// Explicit abstention. Counts toward the total.
    Abstain,
}

impl EchoKind {
    /// All kinds in tie-break order.
    pub const ALL: [Self; 4] = [Self::Resonant, Self::Dissonant, Self::Inquiry, Self::Abstain];

    /// Returns the wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resonant => "resonant",
            Self::Dissonant => "dissonant",
            Self::Inquiry => "inquiry",
            Self::Abstain => "abstain",
        }
    }
}

impl fmt::Display for EchoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EchoKind {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ConsensusError::InvalidVote(s.to_string()))
    }
}

/// One node's recorded vote on one proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoResponse {
    /// Voter.
    pub node_id: NodeId,
    /// Proposal voted on.
    pub proposal_id: ProposalId,
    /// The vote.
    #[serde(rename = "echo_type")]
    pub kind: EchoKind,
    /// Free-form commentary.
    #[serde(default)]
    pub commentary: String,
    /// When the vote was recorded.
    pub timestamp: DateTime<Utc>,
}
