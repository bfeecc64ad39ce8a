//! The node facade tying messaging and consensus together.

use crate::echo_log::{Direction, EchoLog, EchoRecord};
use crate::error::{NodeError, Result};
use crate::payload::{GeneralMessage, NewProposal, ProposalVote, RESERVED_TYPES};
use chrono::{DateTime, Utc};
use echonet_consensus::{
    ConsensusEngine, EchoKind, EngineConfig, ImportOutcome, Proposal, ProposalId, ProposalView,
    VoteOutcome,
};
use echonet_identity::{Identity, PublicKey};
use echonet_p2p::{
    InboundMessage, MessageCategory, MessageHandler, MessageRouter, RouterConfig, RouterEvent,
    RouterState, RouterStats, Transport,
};
use echonet_types::{NodeId, SharedClock, SystemClock};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Settings for one node.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// Local node id.
    pub node_id: NodeId,
    /// Free-form node kind reported in status.
    pub node_type: String,
    /// Router settings.
    pub router: RouterConfig,
    /// Consensus engine settings.
    pub engine: EngineConfig,
    /// Echo log capacity.
    pub echo_log_capacity: usize,
    /// Period of the proposal expiry sweep.
    pub sweep_interval: Duration,
}

impl NodeSettings {
    /// Default settings for `node_id`.
    #[must_use]
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            node_type: "ai_consciousness".into(),
            router: RouterConfig::default(),
            engine: EngineConfig::default(),
            echo_log_capacity: 1000,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Coarse health derived from the router state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkHealth {
    /// Connected to the transport.
    Optimal,
    /// A connect is in progress.
    Degraded,
    /// Not connected.
    Disconnected,
}

impl From<RouterState> for NetworkHealth {
    fn from(state: RouterState) -> Self {
        match state {
            RouterState::Connected => Self::Optimal,
            RouterState::Connecting => Self::Degraded,
            RouterState::Disconnected => Self::Disconnected,
        }
    }
}

/// Snapshot returned by [`EchoNode::network_status`].
#[derive(Debug, Clone, Serialize)]
pub struct NetworkStatus {
    /// Local node id.
    pub node_id: NodeId,
    /// Node kind.
    pub node_type: String,
    /// Key-agreement public key, hex encoded.
    pub public_key: String,
    /// Router state.
    pub state: RouterState,
    /// True while connected.
    pub active: bool,
    /// Peers that have announced themselves.
    pub known_peers: Vec<NodeId>,
    /// Active proposals with their tallies.
    pub active_proposals: Vec<ProposalView>,
    /// Health summary.
    pub health: NetworkHealth,
    /// Router counters.
    pub stats: RouterStats,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

/// A send that did not reach one peer.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryFailure {
    /// Target peer.
    pub node_id: NodeId,
    /// Reason code of the error.
    pub reason: &'static str,
    /// Error message.
    pub error: String,
}

/// Per-peer result of sending one payload to every known peer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BroadcastReport {
    /// Peers the payload was published to.
    pub delivered: Vec<NodeId>,
    /// Peers that could not be reached.
    pub failed: Vec<DeliveryFailure>,
}

impl BroadcastReport {
    /// True if every known peer was reached.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A locally created proposal and the result of announcing it.
#[derive(Debug, Clone, Serialize)]
pub struct ProposalCreated {
    /// The new proposal.
    pub proposal: Proposal,
    /// Announcement delivery.
    pub broadcast: BroadcastReport,
}

/// A local vote and the result of sharing it.
#[derive(Debug, Clone, Serialize)]
pub struct VoteCast {
    /// Engine result.
    #[serde(flatten)]
    pub outcome: VoteOutcome,
    /// Vote delivery.
    pub broadcast: BroadcastReport,
}

/// State reachable from router handlers.
struct Shared {
    node_id: NodeId,
    clock: SharedClock,
    engine: Mutex<ConsensusEngine>,
    echo_log: EchoLog,
    hooks: RwLock<HashMap<MessageCategory, Arc<dyn MessageHandler>>>,
}

impl Shared {
    fn on_message(&self, category: MessageCategory, message: &InboundMessage) {
        self.echo_log.record(
            Direction::Received,
            &message.from,
            &message.payload,
            self.clock.now(),
        );

        match category {
            MessageCategory::Proposal => self.on_proposal(message),
            MessageCategory::Vote => self.on_vote(message),
            MessageCategory::General => {
                let content = message
                    .payload
                    .get("content")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default();
                info!(node_id = %self.node_id, from = %message.from, content, "message received");
            }
        }

        let hook = self.hooks.read().get(&category).cloned();
        if let Some(hook) = hook {
            hook.handle(message);
        }
    }

    fn on_proposal(&self, message: &InboundMessage) {
        let payload: NewProposal = match serde_json::from_value(message.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(node_id = %self.node_id, from = %message.from, error = %e, "malformed proposal payload");
                return;
            }
        };
        let proposal = payload.proposal;
        if proposal.proposer != message.from {
            warn!(
                node_id = %self.node_id,
                from = %message.from,
                proposer = %proposal.proposer,
                "proposal relayed by a node other than its proposer"
            );
            return;
        }

        let id = proposal.id;
        let title = proposal.title.clone();
        let result = self.engine.lock().import(proposal);
        match result {
            Ok(ImportOutcome::Imported) => {
                info!(node_id = %self.node_id, from = %message.from, proposal_id = %id, title = %title, "new proposal");
            }
            Ok(outcome) => {
                debug!(node_id = %self.node_id, proposal_id = %id, ?outcome, "proposal not imported");
            }
            Err(e) => {
                warn!(node_id = %self.node_id, proposal_id = %id, error = %e, "rejected proposal");
            }
        }
    }

    fn on_vote(&self, message: &InboundMessage) {
        let vote: ProposalVote = match serde_json::from_value(message.payload.clone()) {
            Ok(vote) => vote,
            Err(e) => {
                warn!(node_id = %self.node_id, from = %message.from, error = %e, "malformed vote payload");
                return;
            }
        };
        if vote.voter != message.from {
            warn!(
                node_id = %self.node_id,
                from = %message.from,
                voter = %vote.voter,
                "vote relayed by a node other than its voter"
            );
            return;
        }

        let result = vote.vote.parse::<EchoKind>().and_then(|kind| {
            self.engine
                .lock()
                .submit_vote(&vote.proposal_id, &vote.voter, kind, &vote.commentary)
        });
        match result {
            Ok(outcome) => {
                info!(
                    node_id = %self.node_id,
                    voter = %outcome.voter,
                    proposal_id = %outcome.proposal_id,
                    kind = %outcome.kind,
                    status = %outcome.status,
                    "peer vote recorded"
                );
            }
            Err(e) => {
                debug!(
                    node_id = %self.node_id,
                    voter = %vote.voter,
                    proposal_id = %vote.proposal_id,
                    reason = e.reason_code(),
                    "peer vote not recorded"
                );
            }
        }
    }
}

/// Router handler forwarding one category to [`Shared`].
struct CategoryHandler {
    category: MessageCategory,
    shared: Arc<Shared>,
}

impl MessageHandler for CategoryHandler {
    fn handle(&self, message: &InboundMessage) {
        self.shared.on_message(self.category, message);
    }
}

/// One Echo-Net participant.
///
/// Owns the node's identity, router, consensus engine and echo log. Many
/// nodes can share one process and one transport.
pub struct EchoNode {
    node_type: String,
    router: Arc<MessageRouter>,
    shared: Arc<Shared>,
    sweep_interval: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl EchoNode {
    /// Creates a disconnected node with a fresh identity.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Identity`] if key generation fails and
    /// [`NodeError::Consensus`] or [`NodeError::Config`] for unusable
    /// settings.
    pub fn new(settings: NodeSettings, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_clock(settings, transport, Arc::new(SystemClock))
    }

    /// Creates a disconnected node with an explicit clock.
    ///
    /// # Errors
    ///
    /// Same as [`EchoNode::new`].
    pub fn with_clock(
        settings: NodeSettings,
        transport: Arc<dyn Transport>,
        clock: SharedClock,
    ) -> Result<Self> {
        settings.engine.validate()?;
        if settings.sweep_interval.is_zero() {
            return Err(NodeError::Config("sweep interval must be positive".into()));
        }
        let identity = Arc::new(Identity::generate()?);
        Ok(Self::with_identity(settings, identity, transport, clock))
    }

    fn with_identity(
        settings: NodeSettings,
        identity: Arc<Identity>,
        transport: Arc<dyn Transport>,
        clock: SharedClock,
    ) -> Self {
        let router = MessageRouter::with_clock(
            settings.node_id.clone(),
            identity,
            transport,
            settings.router,
            Arc::clone(&clock),
        );
        let shared = Arc::new(Shared {
            node_id: settings.node_id,
            engine: Mutex::new(ConsensusEngine::with_clock(settings.engine, Arc::clone(&clock))),
            echo_log: EchoLog::new(settings.echo_log_capacity),
            hooks: RwLock::new(HashMap::new()),
            clock,
        });

        for category in [
            MessageCategory::General,
            MessageCategory::Proposal,
            MessageCategory::Vote,
        ] {
            router.register_handler(
                category,
                CategoryHandler {
                    category,
                    shared: Arc::clone(&shared),
                },
            );
        }

        Self {
            node_type: settings.node_type,
            router,
            shared,
            sweep_interval: settings.sweep_interval,
            sweeper: Mutex::new(None),
        }
    }

    /// Local node id.
    #[must_use]
    pub fn node_id(&self) -> &NodeId {
        &self.shared.node_id
    }

    /// Key-agreement public key announced to peers.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.router.public_key()
    }

    /// The underlying router.
    #[must_use]
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Subscribes to router security and lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RouterEvent> {
        self.router.subscribe_events()
    }

    /// Joins the network at `address` and starts the expiry sweep.
    ///
    /// # Errors
    ///
    /// Propagates router connection errors; the node stays disconnected.
    pub async fn connect(&self, address: &str) -> Result<()> {
        self.router.connect(address).await?;
        self.start_sweeper();
        info!(node_id = %self.node_id(), node_type = %self.node_type, address, "joined network");
        Ok(())
    }

    /// Leaves the network. Idempotent.
    ///
    /// # Errors
    ///
    /// Propagates transport close errors.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(task) = self.sweeper.lock().take() {
            task.abort();
        }
        self.router.disconnect().await?;
        Ok(())
    }

    fn start_sweeper(&self) {
        let shared = Arc::clone(&self.shared);
        let period = self.sweep_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let expired = shared.engine.lock().sweep_expired();
                if !expired.is_empty() {
                    debug!(node_id = %shared.node_id, count = expired.len(), "swept expired proposals");
                }
            }
        });
        if let Some(previous) = self.sweeper.lock().replace(task) {
            previous.abort();
        }
    }

    /// Registers an application handler for `category`.
    ///
    /// The handler runs after the node's own processing of the message, so a
    /// proposal handler sees the proposal already imported.
    pub fn register_handler<H>(&self, category: MessageCategory, handler: H)
    where
        H: MessageHandler + 'static,
    {
        self.shared.hooks.write().insert(category, Arc::new(handler));
    }

    /// Sends an encrypted payload to one peer.
    ///
    /// # Errors
    ///
    /// [`echonet_p2p::P2pError::PeerUnknown`] if the peer never announced,
    /// [`echonet_p2p::P2pError::NotConnected`] while disconnected, or a
    /// transport error.
    pub async fn send_secure(&self, target: &NodeId, payload: serde_json::Value) -> Result<()> {
        self.router.send_secure(target, payload.clone()).await?;
        self.shared
            .echo_log
            .record(Direction::Sent, target, &payload, self.shared.clock.now());
        Ok(())
    }

    /// Sends a text message to one peer.
    ///
    /// # Errors
    ///
    /// [`NodeError::InvalidMessage`] if `message_type` is reserved for
    /// proposal traffic, otherwise as [`EchoNode::send_secure`].
    pub async fn send_message(&self, target: &NodeId, content: &str, message_type: &str) -> Result<()> {
        let message_type = message_type.trim();
        if message_type.is_empty() || RESERVED_TYPES.contains(&message_type) {
            return Err(NodeError::InvalidMessage(format!(
                "message type {message_type:?} is not allowed"
            )));
        }
        let message = GeneralMessage {
            kind: message_type.to_string(),
            content: content.to_string(),
            signature: format!("{}_{}", self.node_id(), self.shared.clock.now().to_rfc3339()),
        };
        let payload = serde_json::to_value(message).map_err(echonet_p2p::P2pError::from)?;
        self.send_secure(target, payload).await
    }

    /// Creates a proposal and announces it to every known peer.
    ///
    /// # Errors
    ///
    /// [`echonet_consensus::ConsensusError::InvalidProposal`] for an empty
    /// title. Delivery failures are reported, not returned.
    pub async fn create_proposal(
        &self,
        title: &str,
        description: &str,
        proposal_type: &str,
    ) -> Result<ProposalCreated> {
        self.create_proposal_for(title, description, proposal_type, None)
            .await
    }

    /// Like [`EchoNode::create_proposal`] with an explicit lifetime.
    ///
    /// # Errors
    ///
    /// Also rejects a non-positive `duration`.
    pub async fn create_proposal_for(
        &self,
        title: &str,
        description: &str,
        proposal_type: &str,
        duration: Option<chrono::Duration>,
    ) -> Result<ProposalCreated> {
        let proposal = self.shared.engine.lock().create(
            self.node_id(),
            title,
            description,
            proposal_type,
            duration,
        )?;
        let payload = serde_json::to_value(NewProposal::new(proposal.clone()))
            .map_err(echonet_p2p::P2pError::from)?;
        let broadcast = self.broadcast(payload).await;
        info!(
            node_id = %self.node_id(),
            proposal_id = %proposal.id,
            delivered = broadcast.delivered.len(),
            failed = broadcast.failed.len(),
            "proposal announced"
        );
        Ok(ProposalCreated { proposal, broadcast })
    }

    /// Votes on a proposal and shares the vote with every known peer.
    ///
    /// # Errors
    ///
    /// [`echonet_consensus::ConsensusError::InvalidVote`] for an unknown
    /// kind, checked before the engine is touched; otherwise the engine's
    /// `ProposalNotFound` or `ProposalExpired`.
    pub async fn vote(&self, proposal_id: &ProposalId, vote: &str, commentary: &str) -> Result<VoteCast> {
        let kind: EchoKind = vote.parse()?;
        let outcome = self
            .shared
            .engine
            .lock()
            .submit_vote(proposal_id, self.node_id(), kind, commentary)?;

        let payload = serde_json::to_value(ProposalVote::new(
            *proposal_id,
            self.node_id().clone(),
            kind.as_str(),
            commentary,
        ))
        .map_err(echonet_p2p::P2pError::from)?;
        let broadcast = self.broadcast(payload).await;
        Ok(VoteCast { outcome, broadcast })
    }

    /// Withdraws a proposal this node created.
    ///
    /// Peers keep their copy until it expires.
    ///
    /// # Errors
    ///
    /// `NotProposer`, `ProposalNotFound` or `ProposalExpired`.
    pub fn withdraw(&self, proposal_id: &ProposalId) -> Result<ProposalView> {
        let view = self
            .shared
            .engine
            .lock()
            .withdraw(proposal_id, self.node_id())?;
        Ok(view)
    }

    /// Returns an active or historical proposal.
    #[must_use]
    pub fn status(&self, proposal_id: &ProposalId) -> Option<ProposalView> {
        self.shared.engine.lock().status(proposal_id)
    }

    /// Returns active proposals, expiring stale ones first.
    #[must_use]
    pub fn list_active(&self) -> Vec<ProposalView> {
        self.shared.engine.lock().list_active()
    }

    /// Returns finished proposals, newest first.
    #[must_use]
    pub fn proposal_history(&self) -> Vec<ProposalView> {
        self.shared.engine.lock().history()
    }

    /// Returns up to `limit` echo log records, newest first.
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<EchoRecord> {
        self.shared.echo_log.recent(limit)
    }

    /// Returns a snapshot of the node's network view.
    #[must_use]
    pub fn network_status(&self) -> NetworkStatus {
        let state = self.router.state();
        NetworkStatus {
            node_id: self.node_id().clone(),
            node_type: self.node_type.clone(),
            public_key: self.public_key().to_hex(),
            state,
            active: state == RouterState::Connected,
            known_peers: self.router.known_peers(),
            active_proposals: self.list_active(),
            health: state.into(),
            stats: self.router.stats(),
            timestamp: self.shared.clock.now(),
        }
    }

    async fn broadcast(&self, payload: serde_json::Value) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for peer in self.router.known_peers() {
            match self.send_secure(&peer, payload.clone()).await {
                Ok(()) => report.delivered.push(peer),
                Err(e) => {
                    warn!(node_id = %self.node_id(), peer = %peer, error = %e, "broadcast delivery failed");
                    report.failed.push(DeliveryFailure {
                        node_id: peer,
                        reason: e.reason_code(),
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }
}

impl fmt::Debug for EchoNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EchoNode")
            .field("node_id", &self.shared.node_id)
            .field("node_type", &self.node_type)
            .field("state", &self.router.state())
            .finish_non_exhaustive()
    }
}

impl Drop for EchoNode {
    fn drop(&mut self) {
        if let Some(task) = self.sweeper.get_mut().take() {
            task.abort();
        }
    }
}
