//! Storage for active and historical proposals.

use crate::{Proposal, ProposalId};
use std::collections::{HashMap, VecDeque};

/// Active proposals plus a bounded history of terminal ones.
///
/// The store only holds data; status rules live in
/// [`ConsensusEngine`](crate::ConsensusEngine).
#[derive(Debug, Clone)]
pub struct ProposalStore {
    active: HashMap<ProposalId, Proposal>,
    history: VecDeque<Proposal>,
    max_history: usize,
}

impl ProposalStore {
    /// Creates an empty store keeping at most `max_history` terminal proposals.
    #[must_use]
    pub fn new(max_history: usize) -> Self {
        Self {
            active: HashMap::new(),
            history: VecDeque::new(),
            max_history,
        }
    }

    /// Adds a proposal to the active set.
    pub fn insert_active(&mut self, proposal: Proposal) {
        self.active.insert(proposal.id, proposal);
    }

    /// Returns an active proposal.
    #[must_use]
    pub fn active(&self, id: &ProposalId) -> Option<&Proposal> {
        self.active.get(id)
    }

    /// Returns an active proposal mutably.
    pub fn active_mut(&mut self, id: &ProposalId) -> Option<&mut Proposal> {
        self.active.get_mut(id)
    }

    /// Returns a proposal from history.
    #[must_use]
    pub fn historical(&self, id: &ProposalId) -> Option<&Proposal> {
        self.history.iter().rev().find(|p| p.id == *id)
    }

    /// Returns a proposal from either set.
    #[must_use]
    pub fn get(&self, id: &ProposalId) -> Option<&Proposal> {
        self.active(id).or_else(|| self.historical(id))
    }

    /// Returns true if the id is known in either set.
    #[must_use]
    pub fn contains(&self, id: &ProposalId) -> bool {
        self.get(id).is_some()
    }

    /// Moves an active proposal into history, evicting the oldest entries
    /// beyond capacity. Returns the retired proposal.
    pub fn retire(&mut self, id: &ProposalId) -> Option<&Proposal> {
        let proposal = self.active.remove(id)?;
        self.history.push_back(proposal);
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
        self.history.back().filter(|p| p.id == *id)
    }

    /// Iterates over active proposals in no particular order.
    pub fn active_proposals(&self) -> impl Iterator<Item = &Proposal> {
        self.active.values()
    }

    /// Ids of active proposals.
    #[must_use]
    pub fn active_ids(&self) -> Vec<ProposalId> {
        self.active.keys().copied().collect()
    }

    /// Iterates over history, oldest first.
    pub fn history(&self) -> impl DoubleEndedIterator<Item = &Proposal> {
        self.history.iter()
    }

    /// Number of active proposals.
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Number of historical proposals.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

impl Default for ProposalStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProposalStatus;
    use chrono::{Duration, Utc};
    use echonet_types::NodeId;
    use std::collections::BTreeMap;

    fn proposal(title: &str) -> Proposal {
        let now = Utc::now();
        Proposal {
            id: ProposalId::new(),
            proposer: NodeId::new("p").unwrap(),
            title: title.into(),
            description: String::new(),
            proposal_type: "general".into(),
            created_at: now,
            expires_at: now + Duration::hours(1),
            status: ProposalStatus::Active,
            echoes: BTreeMap::new(),
        }
    }

    #[test]
    fn retire_moves_to_history() {
        let mut store = ProposalStore::new(10);
        let p = proposal("one");
        let id = p.id;
        store.insert_active(p);

        assert!(store.active(&id).is_some());
        assert_eq!(store.retire(&id).unwrap().id, id);
        assert!(store.active(&id).is_none());
        assert!(store.historical(&id).is_some());
        assert!(store.contains(&id));
        assert!(store.retire(&id).is_none());
    }

    #[test]
    fn history_is_bounded() {
        let mut store = ProposalStore::new(2);
        let mut ids = Vec::new();
        for i in 0..3 {
            let p = proposal(&format!("p{i}"));
            ids.push(p.id);
            store.insert_active(p);
            store.retire(&ids[i]);
        }

        assert_eq!(store.history_len(), 2);
        assert!(!store.contains(&ids[0]));
        assert!(store.contains(&ids[1]));
        assert!(store.contains(&ids[2]));

        let newest_first: Vec<_> = store.history().rev().map(|p| p.id).collect();
        assert_eq!(newest_first, vec![ids[2], ids[1]]);
    }

    #[test]
    fn zero_history_keeps_nothing() {
        let mut store = ProposalStore::new(0);
        let p = proposal("gone");
        let id = p.id;
        store.insert_active(p);
        assert!(store.retire(&id).is_none());
        assert!(!store.contains(&id));
    }
}
