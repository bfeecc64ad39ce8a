//! Secure message router.
//!
//! The router owns the node's [`PeerDirectory`] and [`SecureChannel`] and is
//! the only component that talks to the [`Transport`]. Each connection runs
//! one pump task per subscribed topic; inbox messages are decrypted on the
//! pump and handed to handlers through a [`DispatchMode`].

use crate::dispatch::DispatchSink;
use crate::{
    AnnounceOutcome, Announcement, DecryptedMessage, DispatchMode, Envelope, MessageCategory,
    P2pError, PeerDirectory, Result, SubscriptionId, Transport,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use echonet_identity::{ChannelConfig, Identity, PublicKey, SecureChannel};
use echonet_types::{NodeId, SharedClock, SystemClock, BROADCAST_TOPIC};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Connection state of a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterState {
    /// Not attached to the transport.
    Disconnected,
    /// A connect call is in progress.
    Connecting,
    /// Subscribed and announced.
    Connected,
}

impl fmt::Display for RouterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// How decrypted messages reach handlers.
    pub dispatch: DispatchMode,
    /// Inbound nonce counters remembered per peer.
    pub replay_window: u64,
    /// Announce again whenever a new peer (or a new key) shows up, so late
    /// joiners learn about nodes that connected before them.
    pub reannounce_on_new_peer: bool,
    /// Greeting included in announcements.
    pub announcement_message: Option<String>,
    /// Capacity of the router event channel.
    pub event_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchMode::default(),
            replay_window: 1024,
            reannounce_on_new_peer: true,
            announcement_message: None,
            event_capacity: 256,
        }
    }
}

/// A decrypted, authenticated message ready for application handlers.
#[derive(Debug, Clone, Serialize)]
pub struct InboundMessage {
    /// Authenticated sender.
    pub from: NodeId,
    /// Recipient (always the local node).
    pub to: NodeId,
    /// Sender's timestamp.
    pub timestamp: DateTime<Utc>,
    /// Category derived from the payload `type`.
    pub category: MessageCategory,
    /// Application payload.
    pub payload: serde_json::Value,
}

/// Application-level consumer of one message category.
pub trait MessageHandler: Send + Sync {
    /// Handles one message. Must not block for long.
    fn handle(&self, message: &InboundMessage);
}

impl<F> MessageHandler for F
where
    F: Fn(&InboundMessage) + Send + Sync,
{
    fn handle(&self, message: &InboundMessage) {
        self(message);
    }
}

/// Security and lifecycle events surfaced by the router.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RouterEvent {
    /// The connection state changed.
    StateChanged {
        /// New state.
        state: RouterState,
    },
    /// A verified announcement updated the directory.
    PeerAnnounced {
        /// Announcing node.
        node_id: NodeId,
        /// True if the node id now maps to a different key.
        key_changed: bool,
    },
    /// An envelope failed authentication and was dropped.
    AuthenticationFailure {
        /// Declared sender.
        from: NodeId,
        /// What failed.
        reason: String,
    },
    /// An envelope arrived from a node that has not announced.
    UnknownSender {
        /// Declared sender.
        from: NodeId,
    },
    /// An inbox payload could not be decoded.
    InvalidEnvelope {
        /// Decode error.
        reason: String,
    },
    /// A broadcast claimed to be an announcement but did not verify.
    InvalidAnnouncement {
        /// Verification error.
        reason: String,
    },
    /// Messages were discarded by a drop-oldest dispatch queue.
    DispatchOverflow {
        /// Number of discarded messages.
        dropped: u64,
    },
    /// No handler is registered for a message's category.
    Unhandled {
        /// Sender.
        from: NodeId,
        /// Category without a handler.
        category: MessageCategory,
    },
}

/// Router counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouterStats {
    /// Envelopes published.
    pub envelopes_sent: u64,
    /// Inbox payloads received.
    pub envelopes_received: u64,
    /// Messages handed to a handler.
    pub messages_delivered: u64,
    /// Envelopes dropped for failed authentication or replay.
    pub authentication_failures: u64,
    /// Envelopes from senders missing from the directory.
    pub unknown_senders: u64,
    /// Undecodable inbox payloads.
    pub invalid_envelopes: u64,
    /// Announcements written to the directory.
    pub announcements_accepted: u64,
    /// Announcements that failed verification.
    pub announcements_rejected: u64,
    /// Broadcast payloads that were not announcements.
    pub broadcasts_ignored: u64,
    /// Messages discarded by the dispatch queue.
    pub dispatch_dropped: u64,
    /// Messages with no registered handler.
    pub unhandled: u64,
}

#[derive(Debug)]
struct Connection {
    tasks: Vec<JoinHandle<()>>,
    subscriptions: Vec<SubscriptionId>,
}

/// Routes encrypted messages between this node and its peers.
pub struct MessageRouter {
    node_id: NodeId,
    identity: Arc<Identity>,
    channel: SecureChannel,
    directory: PeerDirectory,
    transport: Arc<dyn Transport>,
    config: RouterConfig,
    clock: SharedClock,
    state: RwLock<RouterState>,
    connection: Mutex<Option<Connection>>,
    handlers: RwLock<HashMap<MessageCategory, Arc<dyn MessageHandler>>>,
    events: broadcast::Sender<RouterEvent>,
    stats: RwLock<RouterStats>,
}

impl MessageRouter {
    /// Creates a disconnected router using the system clock.
    #[must_use]
    pub fn new(
        node_id: NodeId,
        identity: Arc<Identity>,
        transport: Arc<dyn Transport>,
        config: RouterConfig,
    ) -> Arc<Self> {
        Self::with_clock(node_id, identity, transport, config, Arc::new(SystemClock))
    }

    /// Creates a disconnected router with an explicit clock.
    #[must_use]
    pub fn with_clock(
        node_id: NodeId,
        identity: Arc<Identity>,
        transport: Arc<dyn Transport>,
        config: RouterConfig,
        clock: SharedClock,
    ) -> Arc<Self> {
        let channel = SecureChannel::with_config(
            Arc::clone(&identity),
            ChannelConfig {
                replay_window: config.replay_window,
            },
        );
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Arc::new(Self {
            directory: PeerDirectory::with_clock(node_id.clone(), Arc::clone(&clock)),
            node_id,
            identity,
            channel,
            transport,
            config,
            clock,
            state: RwLock::new(RouterState::Disconnected),
            connection: Mutex::new(None),
            handlers: RwLock::new(HashMap::new()),
            events,
            stats: RwLock::new(RouterStats::default()),
        })
    }

    /// Returns the local node id.
    #[must_use]
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Returns the local key-agreement public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.identity.public_key()
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> RouterState {
        *self.state.read()
    }

    /// Returns the peer directory.
    #[must_use]
    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    /// Returns the node ids of all announced peers.
    #[must_use]
    pub fn known_peers(&self) -> Vec<NodeId> {
        self.directory.node_ids()
    }

    /// Returns a snapshot of the router counters.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        self.stats.read().clone()
    }

    /// Subscribes to router events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RouterEvent> {
        self.events.subscribe()
    }

    /// Registers the handler for `category`, replacing any previous one.
    pub fn register_handler<H>(&self, category: MessageCategory, handler: H)
    where
        H: MessageHandler + 'static,
    {
        let replaced = self
            .handlers
            .write()
            .insert(category, Arc::new(handler))
            .is_some();
        debug!(node_id = %self.node_id, category = %category, replaced, "handler registered");
    }

    /// Removes the handler for `category`.
    pub fn unregister_handler(&self, category: MessageCategory) -> bool {
        self.handlers.write().remove(&category).is_some()
    }

    /// Connects to the transport, subscribes to the inbox and broadcast
    /// topics, and announces this node's key.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::AlreadyConnected`] unless the router is
    /// disconnected, or [`P2pError::TransportUnavailable`] if the transport
    /// fails. A failed connect leaves the router disconnected.
    pub async fn connect(self: &Arc<Self>, address: &str) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != RouterState::Disconnected {
                return Err(P2pError::AlreadyConnected);
            }
            *state = RouterState::Connecting;
        }
        self.emit(RouterEvent::StateChanged {
            state: RouterState::Connecting,
        });

        match self.establish(address).await {
            Ok(connection) => {
                *self.connection.lock() = Some(connection);
                self.set_state(RouterState::Connected);
            }
            Err(e) => {
                if let Err(close_err) = self.transport.close().await {
                    debug!(error = %close_err, "transport close after failed connect");
                }
                self.set_state(RouterState::Disconnected);
                warn!(node_id = %self.node_id, address = %address, error = %e, "connect failed");
                return Err(e);
            }
        }

        if let Err(e) = self.announce().await {
            warn!(node_id = %self.node_id, error = %e, "initial announcement failed");
            self.disconnect().await?;
            return Err(e);
        }

        info!(node_id = %self.node_id, address = %address, "router connected");
        Ok(())
    }

    async fn establish(self: &Arc<Self>, address: &str) -> Result<Connection> {
        self.transport.connect(address).await?;

        let inbox = self.transport.subscribe(&self.node_id.inbox_topic()).await?;
        let broadcast = match self.transport.subscribe(BROADCAST_TOPIC).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.transport.unsubscribe(inbox.id).await?;
                return Err(e);
            }
        };

        let subscriptions = vec![inbox.id, broadcast.id];
        let (sink, worker) = DispatchSink::start(self.config.dispatch, Arc::downgrade(self));

        let mut tasks: Vec<JoinHandle<()>> = worker.into_iter().collect();
        tasks.push(tokio::spawn(run_inbox(
            Arc::downgrade(self),
            inbox.receiver,
            sink,
        )));
        tasks.push(tokio::spawn(run_broadcast(
            Arc::downgrade(self),
            broadcast.receiver,
        )));

        Ok(Connection {
            tasks,
            subscriptions,
        })
    }

    /// Unsubscribes from both topics, stops delivery tasks and marks the
    /// router disconnected. Idempotent.
    ///
    /// Must not be called from inside a handler running inline.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if closing fails; the router is
    /// disconnected regardless.
    pub async fn disconnect(&self) -> Result<()> {
        let connection = self.connection.lock().take();
        if connection.is_none() && self.state() == RouterState::Disconnected {
            return Ok(());
        }

        self.set_state(RouterState::Disconnected);
        if let Some(connection) = connection {
            for task in &connection.tasks {
                task.abort();
            }
            for id in connection.subscriptions {
                if let Err(e) = self.transport.unsubscribe(id).await {
                    warn!(node_id = %self.node_id, subscription = id, error = %e, "unsubscribe failed");
                }
            }
        }

        let closed = self.transport.close().await;
        info!(node_id = %self.node_id, "router disconnected");
        closed
    }

    /// Publishes a signed announcement of this node's public key.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::NotConnected`] or a transport error.
    pub async fn announce(&self) -> Result<()> {
        self.ensure_connected()?;
        let announcement = Announcement::signed(
            &self.identity,
            self.node_id.clone(),
            self.clock.now(),
            self.config.announcement_message.clone(),
        );
        self.transport
            .publish(BROADCAST_TOPIC, Bytes::from(announcement.to_bytes()?))
            .await?;
        debug!(node_id = %self.node_id, key = %self.identity.public_key().short_id(), "announced");
        Ok(())
    }

    /// Encrypts `payload` for `target` and publishes it to the target's inbox.
    ///
    /// Does not retry.
    ///
    /// # Errors
    ///
    /// - [`P2pError::NotConnected`] if the router is not connected.
    /// - [`P2pError::PeerUnknown`] if `target` never announced; no network
    ///   I/O happens in that case.
    /// - A transport error if publishing fails.
    pub async fn send_secure(&self, target: &NodeId, payload: serde_json::Value) -> Result<()> {
        self.ensure_connected()?;
        let peer_key = self.directory.lookup(target)?;
        let envelope = self.seal(target, &peer_key, payload)?;

        if let Err(e) = self
            .transport
            .publish(&target.inbox_topic(), Bytes::from(envelope.to_bytes()?))
            .await
        {
            warn!(node_id = %self.node_id, target = %target, error = %e, "publish failed");
            return Err(e);
        }

        self.stats.write().envelopes_sent += 1;
        debug!(node_id = %self.node_id, target = %target, "envelope sent");
        Ok(())
    }

    fn seal(&self, target: &NodeId, peer_key: &PublicKey, payload: serde_json::Value) -> Result<Envelope> {
        let timestamp = self.clock.now();
        let message = DecryptedMessage {
            from: self.node_id.clone(),
            to: target.clone(),
            timestamp,
            payload,
        };
        let plaintext = serde_json::to_vec(&message)?;
        let aad = Envelope::associated_data(&self.node_id, target);
        let sealed = self.channel.encrypt(target, peer_key, &plaintext, &aad)?;
        Ok(Envelope::new(sealed, self.node_id.clone(), target.clone(), timestamp))
    }

    /// Decodes, authenticates and decrypts one inbox payload.
    ///
    /// Exactly one key is tried: the one announced by the envelope's declared
    /// sender.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::InvalidEnvelope`], [`P2pError::PeerUnknown`] or
    /// [`P2pError::AuthenticationFailure`]. Every failure is counted and
    /// surfaced as a [`RouterEvent`].
    pub fn handle_inbox(&self, bytes: &[u8]) -> Result<InboundMessage> {
        self.stats.write().envelopes_received += 1;

        let envelope = Envelope::from_slice(bytes).map_err(|e| self.invalid_envelope(e.to_string()))?;
        if envelope.to != self.node_id {
            return Err(self.invalid_envelope(format!("addressed to {}", envelope.to)));
        }

        let peer_key = match self.directory.lookup(&envelope.from) {
            Ok(key) => key,
            Err(e) => {
                self.stats.write().unknown_senders += 1;
                debug!(node_id = %self.node_id, from = %envelope.from, "envelope from unannounced peer");
                self.emit(RouterEvent::UnknownSender {
                    from: envelope.from.clone(),
                });
                return Err(e);
            }
        };

        let aad = Envelope::associated_data(&envelope.from, &envelope.to);
        let plaintext = self
            .channel
            .decrypt(&envelope.from, &peer_key, &envelope.sealed(), &aad)
            .map_err(|e| self.authentication_failure(&envelope.from, e.to_string()))?;

        let message: DecryptedMessage = serde_json::from_slice(&plaintext)
            .map_err(|e| self.invalid_envelope(format!("malformed plaintext: {e}")))?;
        if message.from != envelope.from || message.to != envelope.to {
            return Err(self.authentication_failure(
                &envelope.from,
                "inner header does not match envelope".into(),
            ));
        }

        trace!(node_id = %self.node_id, from = %message.from, "envelope decrypted");
        Ok(InboundMessage {
            category: MessageCategory::of(&message.payload),
            from: message.from,
            to: message.to,
            timestamp: message.timestamp,
            payload: message.payload,
        })
    }

    /// Processes one broadcast payload.
    ///
    /// Non-announcements return `Ok(None)`. Verified announcements update the
    /// directory; a new peer or key triggers a re-announcement when
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::InvalidAnnouncement`] for malformed or unverifiable
    /// announcements.
    pub async fn handle_broadcast(&self, bytes: &[u8]) -> Result<Option<AnnounceOutcome>> {
        let announcement = match Announcement::parse(bytes) {
            Ok(Some(announcement)) => announcement,
            Ok(None) => {
                self.stats.write().broadcasts_ignored += 1;
                trace!(node_id = %self.node_id, "ignoring non-announcement broadcast");
                return Ok(None);
            }
            Err(e) => return Err(self.invalid_announcement(e)),
        };
        if let Err(e) = announcement.verify() {
            return Err(self.invalid_announcement(e));
        }

        let outcome = self.directory.record_announcement(
            &announcement.node_id,
            announcement.public_key,
            announcement.signing_key,
            announcement.timestamp,
        );

        match outcome {
            AnnounceOutcome::New | AnnounceOutcome::KeyChanged | AnnounceOutcome::Refreshed => {
                self.stats.write().announcements_accepted += 1;
                let key_changed = outcome == AnnounceOutcome::KeyChanged;
                if outcome != AnnounceOutcome::Refreshed {
                    info!(
                        node_id = %self.node_id,
                        peer = %announcement.node_id,
                        key = %announcement.public_key.short_id(),
                        key_changed,
                        "peer announced"
                    );
                }
                self.emit(RouterEvent::PeerAnnounced {
                    node_id: announcement.node_id.clone(),
                    key_changed,
                });
            }
            AnnounceOutcome::SelfAnnouncement => {}
        }

        if self.config.reannounce_on_new_peer
            && matches!(outcome, AnnounceOutcome::New | AnnounceOutcome::KeyChanged)
        {
            if let Err(e) = self.announce().await {
                debug!(node_id = %self.node_id, error = %e, "re-announcement failed");
            }
        }

        Ok(Some(outcome))
    }

    pub(crate) fn deliver(&self, message: &InboundMessage) {
        let handler = self.handlers.read().get(&message.category).cloned();
        match handler {
            Some(handler) => {
                handler.handle(message);
                self.stats.write().messages_delivered += 1;
            }
            None => {
                self.stats.write().unhandled += 1;
                debug!(
                    node_id = %self.node_id,
                    from = %message.from,
                    category = %message.category,
                    "no handler registered"
                );
                self.emit(RouterEvent::Unhandled {
                    from: message.from.clone(),
                    category: message.category,
                });
            }
        }
    }

    pub(crate) fn record_overflow(&self, dropped: u64) {
        self.stats.write().dispatch_dropped += dropped;
        warn!(node_id = %self.node_id, dropped, "dispatch queue overflow, oldest messages dropped");
        self.emit(RouterEvent::DispatchOverflow { dropped });
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.state() == RouterState::Connected {
            Ok(())
        } else {
            Err(P2pError::NotConnected)
        }
    }

    fn set_state(&self, state: RouterState) {
        *self.state.write() = state;
        self.emit(RouterEvent::StateChanged { state });
    }

    fn emit(&self, event: RouterEvent) {
        // No subscribers is fine.
        self.events.send(event).ok();
    }

    fn invalid_envelope(&self, reason: String) -> P2pError {
        self.stats.write().invalid_envelopes += 1;
        warn!(node_id = %self.node_id, reason = %reason, "dropping invalid envelope");
        self.emit(RouterEvent::InvalidEnvelope {
            reason: reason.clone(),
        });
        P2pError::InvalidEnvelope(reason)
    }

    fn authentication_failure(&self, from: &NodeId, reason: String) -> P2pError {
        self.stats.write().authentication_failures += 1;
        warn!(
            node_id = %self.node_id,
            from = %from,
            reason = %reason,
            "dropping envelope that failed authentication"
        );
        self.emit(RouterEvent::AuthenticationFailure {
            from: from.clone(),
            reason: reason.clone(),
        });
        P2pError::AuthenticationFailure {
            from: from.clone(),
            reason,
        }
    }

    fn invalid_announcement(&self, error: P2pError) -> P2pError {
        self.stats.write().announcements_rejected += 1;
        warn!(node_id = %self.node_id, error = %error, "rejecting announcement");
        self.emit(RouterEvent::InvalidAnnouncement {
            reason: error.to_string(),
        });
        error
    }
}

impl fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRouter")
            .field("node_id", &self.node_id)
            .field("state", &self.state())
            .field("peers", &self.directory.len())
            .finish_non_exhaustive()
    }
}

async fn run_inbox(
    router: Weak<MessageRouter>,
    mut receiver: mpsc::UnboundedReceiver<Bytes>,
    sink: DispatchSink,
) {
    while let Some(bytes) = receiver.recv().await {
        let Some(router) = router.upgrade() else { break };
        let Ok(message) = router.handle_inbox(&bytes) else {
            continue;
        };
        if !sink.dispatch(&router, message).await {
            break;
        }
    }
}

async fn run_broadcast(router: Weak<MessageRouter>, mut receiver: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(bytes) = receiver.recv().await {
        let Some(router) = router.upgrade() else { break };
        if let Err(e) = router.handle_broadcast(&bytes).await {
            // Already counted and surfaced as an event.
            trace!(node_id = %router.node_id(), error = %e, "broadcast dropped");
        }
    }
}
