//! Proposals and their status machine.

use crate::{ConsensusError, EchoResponse, Result};
use chrono::{DateTime, Utc};
use echonet_types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A globally unique proposal identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalId(Uuid);

impl ProposalId {
    /// Allocates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ProposalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProposalId {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ConsensusError::InvalidProposal(format!("bad proposal id {s:?}: {e}")))
    }
}

/// The state of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    /// Being assembled; promoted to active before anyone can see it.
    Draft,
    /// Accepting votes.
    Active,
    /// One echo kind reached the convergence threshold.
    Converged,
    /// The deadline passed before convergence.
    Expired,
    /// Withdrawn by the proposer.
    Failed,
}

impl ProposalStatus {
    /// Returns true for statuses that accept no further votes.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Converged | Self::Expired | Self::Failed)
    }

    /// Returns true if moving from `self` to `next` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Active)
                | (Self::Active, Self::Converged | Self::Expired | Self::Failed)
        )
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Active => write!(f, "active"),
            Self::Converged => write!(f, "converged"),
            Self::Expired => write!(f, "expired"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A unit of decision put to the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    /// Unique identifier.
    pub id: ProposalId,
    /// Node that created the proposal.
    pub proposer: NodeId,
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Free-form type tag (for example `protocol` or `general`).
    pub proposal_type: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Voting deadline, strictly after `created_at`.
    pub expires_at: DateTime<Utc>,
    /// Current status.
    pub status: ProposalStatus,
    /// At most one echo per voter.
    #[serde(default)]
    pub echoes: BTreeMap<NodeId, EchoResponse>,
}

impl Proposal {
    /// Returns true if `now` is past the deadline.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Moves to `next`, enforcing monotonic transitions.
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::InvalidStateTransition`] if not allowed.
    pub fn transition(&mut self, next: ProposalStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ConsensusError::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Records `echo`, replacing any earlier echo from the same voter.
    ///
    /// Returns true if an earlier echo was replaced.
    pub fn record_echo(&mut self, echo: EchoResponse) -> bool {
        self.echoes.insert(echo.node_id.clone(), echo).is_some()
    }

    /// Number of distinct voters.
    #[must_use]
    pub fn vote_count(&self) -> usize {
        self.echoes.len()
    }

    /// Checks the structural invariants of a proposal received from a peer.
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::InvalidProposal`] describing the violation.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(ConsensusError::InvalidProposal("title cannot be empty".into()));
        }
        if self.expires_at <= self.created_at {
            return Err(ConsensusError::InvalidProposal(
                "expires_at must be after created_at".into(),
            ));
        }
        if let Some(echo) = self.echoes.values().find(|e| e.proposal_id != self.id) {
            return Err(ConsensusError::InvalidProposal(format!(
                "echo from {} references another proposal",
                echo.node_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_monotonic() {
        use ProposalStatus::*;

        assert!(Draft.can_transition_to(Active));
        assert!(Active.can_transition_to(Converged));
        assert!(Active.can_transition_to(Expired));
        assert!(Active.can_transition_to(Failed));

        assert!(!Draft.can_transition_to(Converged));
        assert!(!Converged.can_transition_to(Active));
        assert!(!Expired.can_transition_to(Converged));
        assert!(!Failed.can_transition_to(Expired));

        assert!(Converged.is_terminal());
        assert!(!Active.is_terminal());
    }

    #[test]
    fn proposal_id_roundtrip() {
        let id = ProposalId::new();
        assert_eq!(id.to_string().parse::<ProposalId>().unwrap(), id);
        assert_eq!(
            "nope".parse::<ProposalId>().unwrap_err().reason_code(),
            "invalid_proposal"
        );
    }

    #[test]
    fn status_serde() {
        assert_eq!(
            serde_json::to_string(&ProposalStatus::Converged).unwrap(),
            "\"converged\""
        );
    }
}
