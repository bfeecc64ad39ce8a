//! Proposal lifecycle engine.
//!
//! The engine is a plain synchronous state machine. It performs no I/O and
//! is meant to sit behind one per-node lock, so vote submission and the
//! periodic expiry sweep never race on a status transition.

use crate::{
    ConsensusError, EchoKind, EchoResponse, Proposal, ProposalId, ProposalStatus, ProposalStore,
    Result, Tally, DEFAULT_CONVERGENCE_THRESHOLD, DEFAULT_PROPOSAL_HOURS,
};
use chrono::Duration;
use echonet_types::{NodeId, SharedClock, SystemClock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration for the consensus engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fraction of votes one kind needs for convergence, in `(0, 1]`.
    pub convergence_threshold: f64,

    /// Lifetime of proposals created without an explicit duration.
    pub default_duration: Duration,

    /// Minimum number of votes before a proposal may converge.
    pub quorum: usize,

    /// Number of terminal proposals kept in history.
    pub max_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            convergence_threshold: DEFAULT_CONVERGENCE_THRESHOLD,
            default_duration: Duration::hours(DEFAULT_PROPOSAL_HOURS),
            quorum: 1,
            max_history: 1000,
        }
    }
}

impl EngineConfig {
    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::InvalidProposal`] if the threshold is outside
    /// `(0, 1]`, the quorum is zero, or the default duration is not positive.
    pub fn validate(&self) -> Result<()> {
        if !(self.convergence_threshold > 0.0 && self.convergence_threshold <= 1.0) {
            return Err(ConsensusError::InvalidProposal(format!(
                "convergence threshold {} outside (0, 1]",
                self.convergence_threshold
            )));
        }
        if self.quorum == 0 {
            return Err(ConsensusError::InvalidProposal("quorum must be at least 1".into()));
        }
        if self.default_duration <= Duration::zero() {
            return Err(ConsensusError::InvalidProposal(
                "default duration must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// A proposal together with its current tally.
#[derive(Debug, Clone, Serialize)]
pub struct ProposalView {
    /// The proposal.
    #[serde(flatten)]
    pub proposal: Proposal,
    /// Its tally.
    pub tally: Tally,
}

/// Result of a successful vote.
#[derive(Debug, Clone, Serialize)]
pub struct VoteOutcome {
    /// Proposal voted on.
    pub proposal_id: ProposalId,
    /// Voter.
    pub voter: NodeId,
    /// Recorded kind.
    pub kind: EchoKind,
    /// True if the voter's earlier echo was replaced.
    pub replaced: bool,
    /// Proposal status after the vote.
    pub status: ProposalStatus,
    /// Tally after the vote.
    pub tally: Tally,
}

/// Result of importing a proposal announced by a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Added to the active set.
    Imported,
    /// Already known locally.
    Duplicate,
    /// Already past its deadline; not stored.
    Expired,
}

/// The consensus engine.
#[derive(Debug)]
pub struct ConsensusEngine {
    config: EngineConfig,
    clock: SharedClock,
    store: ProposalStore,
}

impl ConsensusEngine {
    /// Creates an engine on the system clock.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates an engine with an explicit clock.
    #[must_use]
    pub fn with_clock(config: EngineConfig, clock: SharedClock) -> Self {
        let store = ProposalStore::new(config.max_history);
        Self {
            config,
            clock,
            store,
        }
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &ProposalStore {
        &self.store
    }

    /// Creates an active proposal.
    ///
    /// `duration` defaults to the configured default lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::InvalidProposal`] for an empty title or a
    /// non-positive duration.
    pub fn create(
        &mut self,
        proposer: &NodeId,
        title: &str,
        description: &str,
        proposal_type: &str,
        duration: Option<Duration>,
    ) -> Result<Proposal> {
        let duration = duration.unwrap_or(self.config.default_duration);
        if duration <= Duration::zero() {
            return Err(ConsensusError::InvalidProposal(
                "duration must be positive".into(),
            ));
        }
        if title.trim().is_empty() {
            return Err(ConsensusError::InvalidProposal("title cannot be empty".into()));
        }

        let created_at = self.clock.now();
        let expires_at = created_at
            .checked_add_signed(duration)
            .ok_or_else(|| ConsensusError::InvalidProposal("duration out of range".into()))?;

        let mut proposal = Proposal {
            id: ProposalId::new(),
            proposer: proposer.clone(),
            title: title.to_string(),
            description: description.to_string(),
            proposal_type: proposal_type.to_string(),
            created_at,
            expires_at,
            status: ProposalStatus::Draft,
            echoes: BTreeMap::new(),
        };
        proposal.transition(ProposalStatus::Active)?;
        self.store.insert_active(proposal.clone());

        info!(
            proposal_id = %proposal.id,
            proposer = %proposer,
            title = %proposal.title,
            expires_at = %proposal.expires_at,
            "proposal created"
        );
        Ok(proposal)
    }

    /// Records `voter`'s echo on an active proposal.
    ///
    /// Expiry is checked first. A later vote from the same voter replaces the
    /// earlier one. Reaching the convergence threshold with at least `quorum`
    /// votes moves the proposal to history in the same call.
    ///
    /// # Errors
    ///
    /// - [`ConsensusError::ProposalNotFound`] if the proposal is not active.
    /// - [`ConsensusError::ProposalExpired`] if the deadline passed; the
    ///   proposal becomes `Expired` and no vote is recorded.
    pub fn submit_vote(
        &mut self,
        id: &ProposalId,
        voter: &NodeId,
        kind: EchoKind,
        commentary: &str,
    ) -> Result<VoteOutcome> {
        let now = self.clock.now();
        let expired = match self.store.active(id) {
            Some(proposal) => proposal.is_expired_at(now),
            None => return Err(self.missing(id)),
        };
        if expired {
            self.expire(id);
            return Err(ConsensusError::ProposalExpired(*id));
        }

        let threshold = self.config.convergence_threshold;
        let quorum = self.config.quorum;
        let proposal = self
            .store
            .active_mut(id)
            .ok_or(ConsensusError::ProposalNotFound(*id))?;

        let replaced = proposal.record_echo(EchoResponse {
            node_id: voter.clone(),
            proposal_id: *id,
            kind,
            commentary: commentary.to_string(),
            timestamp: now,
        });
        let tally = Tally::compute(proposal.echoes.values(), threshold);

        debug!(
            proposal_id = %id,
            voter = %voter,
            kind = %kind,
            replaced,
            total = tally.total,
            strength = tally.consensus_strength,
            "vote recorded"
        );

        if tally.convergence_achieved && tally.total >= quorum {
            proposal.transition(ProposalStatus::Converged)?;
            info!(
                proposal_id = %id,
                dominant = ?tally.dominant,
                strength = tally.consensus_strength,
                "proposal converged"
            );
        }
        let status = proposal.status;
        if status.is_terminal() {
            self.store.retire(id);
        }

        Ok(VoteOutcome {
            proposal_id: *id,
            voter: voter.clone(),
            kind,
            replaced,
            status,
            tally,
        })
    }

    /// Expires every active proposal past its deadline.
    ///
    /// Returns the ids that were expired.
    pub fn sweep_expired(&mut self) -> Vec<ProposalId> {
        let now = self.clock.now();
        let expired: Vec<ProposalId> = self
            .store
            .active_proposals()
            .filter(|p| p.is_expired_at(now))
            .map(|p| p.id)
            .collect();

        for id in &expired {
            self.expire(id);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "expiry sweep");
        }
        expired
    }

    /// Returns active proposals, oldest first, after expiring stale ones.
    pub fn list_active(&mut self) -> Vec<ProposalView> {
        self.sweep_expired();
        let mut views: Vec<ProposalView> = self
            .store
            .active_proposals()
            .map(|p| self.view(p))
            .collect();
        views.sort_by(|a, b| {
            a.proposal
                .created_at
                .cmp(&b.proposal.created_at)
                .then_with(|| a.proposal.id.cmp(&b.proposal.id))
        });
        views
    }

    /// Returns the view of an active or historical proposal.
    ///
    /// An active proposal past its deadline is expired first.
    pub fn status(&mut self, id: &ProposalId) -> Option<ProposalView> {
        let now = self.clock.now();
        if self.store.active(id).is_some_and(|p| p.is_expired_at(now)) {
            self.expire(id);
        }
        self.store.get(id).map(|p| self.view(p))
    }

    /// Returns terminal proposals, newest first.
    #[must_use]
    pub fn history(&self) -> Vec<ProposalView> {
        self.store.history().rev().map(|p| self.view(p)).collect()
    }

    /// Number of active proposals, without sweeping.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.store.active_len()
    }

    /// Adopts a proposal created by a peer.
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::InvalidProposal`] if the proposal is not
    /// active or breaks a structural invariant.
    pub fn import(&mut self, mut proposal: Proposal) -> Result<ImportOutcome> {
        proposal.validate()?;
        if proposal.status != ProposalStatus::Active {
            return Err(ConsensusError::InvalidProposal(format!(
                "cannot import a {} proposal",
                proposal.status
            )));
        }
        if self.store.contains(&proposal.id) {
            return Ok(ImportOutcome::Duplicate);
        }
        if proposal.is_expired_at(self.clock.now()) {
            debug!(proposal_id = %proposal.id, "ignoring expired proposal from peer");
            return Ok(ImportOutcome::Expired);
        }

        let id = proposal.id;
        let tally = Tally::compute(proposal.echoes.values(), self.config.convergence_threshold);
        if tally.convergence_achieved && tally.total >= self.config.quorum {
            proposal.transition(ProposalStatus::Converged)?;
        }
        info!(proposal_id = %id, proposer = %proposal.proposer, "proposal imported");
        let terminal = proposal.status.is_terminal();
        self.store.insert_active(proposal);
        if terminal {
            self.store.retire(&id);
        }
        Ok(ImportOutcome::Imported)
    }

    /// Withdraws an active proposal on behalf of its proposer.
    ///
    /// # Errors
    ///
    /// - [`ConsensusError::ProposalNotFound`] if the proposal is not active.
    /// - [`ConsensusError::ProposalExpired`] if it expired first.
    /// - [`ConsensusError::NotProposer`] if `requester` did not create it.
    pub fn withdraw(&mut self, id: &ProposalId, requester: &NodeId) -> Result<ProposalView> {
        let now = self.clock.now();
        let (expired, proposer) = match self.store.active(id) {
            Some(p) => (p.is_expired_at(now), p.proposer.clone()),
            None => return Err(self.missing(id)),
        };
        if expired {
            self.expire(id);
            return Err(ConsensusError::ProposalExpired(*id));
        }
        if proposer != *requester {
            return Err(ConsensusError::NotProposer {
                id: *id,
                requester: requester.clone(),
            });
        }

        let proposal = self
            .store
            .active_mut(id)
            .ok_or(ConsensusError::ProposalNotFound(*id))?;
        proposal.transition(ProposalStatus::Failed)?;
        let view = ProposalView {
            tally: Tally::compute(proposal.echoes.values(), self.config.convergence_threshold),
            proposal: proposal.clone(),
        };
        self.store.retire(id);
        info!(proposal_id = %id, "proposal withdrawn");
        Ok(view)
    }

    fn expire(&mut self, id: &ProposalId) {
        if let Some(proposal) = self.store.active_mut(id) {
            if proposal.transition(ProposalStatus::Expired).is_ok() {
                info!(proposal_id = %id, votes = proposal.vote_count(), "proposal expired");
            }
        }
        self.store.retire(id);
    }

    fn missing(&self, id: &ProposalId) -> ConsensusError {
        match self.store.historical(id) {
            Some(p) if p.status == ProposalStatus::Expired => ConsensusError::ProposalExpired(*id),
            _ => ConsensusError::ProposalNotFound(*id),
        }
    }

    fn view(&self, proposal: &Proposal) -> ProposalView {
        ProposalView {
            tally: Tally::compute(proposal.echoes.values(), self.config.convergence_threshold),
            proposal: proposal.clone(),
        }
    }
}
