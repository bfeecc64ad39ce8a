//! Directory of announced peers.

use crate::{P2pError, Result};
use chrono::{DateTime, Utc};
use echonet_identity::{PublicKey, SigningPublicKey};
use echonet_types::{NodeId, SharedClock, SystemClock};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// What we know about a remote node.
#[derive(Debug, Clone, Serialize)]
pub struct PeerRecord {
    /// The peer's node id.
    pub node_id: NodeId,
    /// Key-agreement public key from the latest announcement.
    pub public_key: PublicKey,
    /// Key that signed the latest announcement.
    pub signing_key: SigningPublicKey,
    /// When this node first heard of the peer.
    pub first_seen: DateTime<Utc>,
    /// Timestamp carried by the latest accepted announcement.
    pub last_announced: DateTime<Utc>,
}

/// Result of recording an announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceOutcome {
    /// First announcement from this node id.
    New,
    /// Same key announced again.
    Refreshed,
    /// The node id now maps to a different key.
    KeyChanged,
    /// The announcement came from the local node.
    SelfAnnouncement,
}

impl AnnounceOutcome {
    /// Returns true if the directory entry was written.
    #[must_use]
    pub fn is_recorded(self) -> bool {
        matches!(self, Self::New | Self::Refreshed | Self::KeyChanged)
    }
}

/// Mapping from node id to the peer's last announced keys.
///
/// Entries are overwritten wholesale on each accepted announcement and never
/// deleted.
#[derive(Debug)]
pub struct PeerDirectory {
    local: NodeId,
    clock: SharedClock,
    peers: RwLock<HashMap<NodeId, PeerRecord>>,
}

impl PeerDirectory {
    /// Creates an empty directory for the local node.
    #[must_use]
    pub fn new(local: NodeId) -> Self {
        Self::with_clock(local, Arc::new(SystemClock))
    }

    /// Creates an empty directory that stamps first-seen times from `clock`.
    #[must_use]
    pub fn with_clock(local: NodeId, clock: SharedClock) -> Self {
        Self {
            local,
            clock,
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Records a verified announcement.
    ///
    /// Self-announcements are ignored. Otherwise the last arrival wins: the
    /// entry is replaced whatever its timestamp, keeping the original
    /// first-seen time.
    pub fn record_announcement(
        &self,
        node_id: &NodeId,
        public_key: PublicKey,
        signing_key: SigningPublicKey,
        announced_at: DateTime<Utc>,
    ) -> AnnounceOutcome {
        if *node_id == self.local {
            return AnnounceOutcome::SelfAnnouncement;
        }

        let mut peers = self.peers.write();
        let (outcome, first_seen) = match peers.get(node_id) {
            None => (AnnounceOutcome::New, self.clock.now()),
            Some(existing) if existing.public_key == public_key => {
                (AnnounceOutcome::Refreshed, existing.first_seen)
            }
            Some(existing) => (AnnounceOutcome::KeyChanged, existing.first_seen),
        };

        peers.insert(
            node_id.clone(),
            PeerRecord {
                node_id: node_id.clone(),
                public_key,
                signing_key,
                first_seen,
                last_announced: announced_at,
            },
        );
        outcome
    }

    /// Returns the public key announced by `node_id`.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::PeerUnknown`] if the node never announced.
    pub fn lookup(&self, node_id: &NodeId) -> Result<PublicKey> {
        self.peers
            .read()
            .get(node_id)
            .map(|record| record.public_key)
            .ok_or_else(|| P2pError::PeerUnknown(node_id.clone()))
    }

    /// Returns the full record for `node_id`.
    #[must_use]
    pub fn get(&self, node_id: &NodeId) -> Option<PeerRecord> {
        self.peers.read().get(node_id).cloned()
    }

    /// Returns true if `node_id` has announced.
    #[must_use]
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.peers.read().contains_key(node_id)
    }

    /// Returns all known peers ordered by node id.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerRecord> {
        let mut peers: Vec<_> = self.peers.read().values().cloned().collect();
        peers.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        peers
    }

    /// Returns all known node ids in order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<_> = self.peers.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of known peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// Returns true if no peer has announced yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}
