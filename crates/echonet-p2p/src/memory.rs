//! In-process publish/subscribe bus.
//!
//! Every node in a process shares one [`MemoryBus`] and gets its own
//! [`MemoryTransport`] handle. Topic fan-out uses unbounded channels so a
//! slow subscriber never blocks a publisher.

use crate::{P2pError, Result, Subscription, SubscriptionId, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Address scheme accepted by [`MemoryTransport::connect`].
pub const MEMORY_SCHEME: &str = "memory://";

/// Bus statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BusStats {
    /// Total publish calls.
    pub published: u64,
    /// Total payload deliveries to subscribers.
    pub delivered: u64,
    /// Currently active subscriptions.
    pub subscriptions: usize,
}

#[derive(Debug)]
struct Subscriber {
    id: SubscriptionId,
    sender: mpsc::UnboundedSender<Bytes>,
}

/// A shared in-memory topic bus.
#[derive(Debug)]
pub struct MemoryBus {
    topics: RwLock<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
    available: AtomicBool,
    stats: RwLock<BusStats>,
}

impl MemoryBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
            stats: RwLock::new(BusStats::default()),
        })
    }

    /// Creates a transport handle on this bus.
    #[must_use]
    pub fn transport(self: &Arc<Self>) -> MemoryTransport {
        MemoryTransport::new(Arc::clone(self))
    }

    /// Simulates an outage: while unavailable, connect and publish fail.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns true unless an outage is being simulated.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(P2pError::TransportUnavailable("memory bus is down".into()))
        }
    }

    /// Delivers `payload` to every live subscriber of `topic`.
    ///
    /// Returns the number of subscribers reached.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::TransportUnavailable`] during a simulated outage.
    pub fn publish(&self, topic: &str, payload: Bytes) -> Result<usize> {
        self.ensure_available()?;

        let mut topics = self.topics.write();
        let delivered = match topics.get_mut(topic) {
            Some(subscribers) => {
                subscribers.retain(|s| s.sender.send(payload.clone()).is_ok());
                subscribers.len()
            }
            None => 0,
        };
        drop(topics);

        let mut stats = self.stats.write();
        stats.published += 1;
        stats.delivered += delivered as u64;
        drop(stats);

        trace!(topic = %topic, delivered, "published");
        Ok(delivered)
    }

    /// Subscribes to `topic`.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber { id, sender });
        debug!(topic = %topic, subscription = id, "subscribed");

        Subscription {
            id,
            topic: topic.to_string(),
            receiver,
        }
    }

    /// Removes a subscription. Returns false if it did not exist.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut topics = self.topics.write();
        let mut removed = false;
        for subscribers in topics.values_mut() {
            let before = subscribers.len();
            subscribers.retain(|s| s.id != id);
            removed |= subscribers.len() != before;
        }
        topics.retain(|_, subscribers| !subscribers.is_empty());
        removed
    }

    /// Number of live subscribers on `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map_or(0, |subscribers| {
                subscribers.iter().filter(|s| !s.sender.is_closed()).count()
            })
    }

    /// Returns bus statistics.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        let mut stats = self.stats.read().clone();
        stats.subscriptions = self.topics.read().values().map(Vec::len).sum();
        stats
    }
}

/// One node's connection to a [`MemoryBus`].
#[derive(Debug)]
pub struct MemoryTransport {
    bus: Arc<MemoryBus>,
    connected: AtomicBool,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    published: AtomicU64,
}

impl MemoryTransport {
    /// Creates a disconnected handle on `bus`.
    #[must_use]
    pub fn new(bus: Arc<MemoryBus>) -> Self {
        Self {
            bus,
            connected: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
            published: AtomicU64::new(0),
        }
    }

    /// Number of publish calls made through this handle.
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    /// Returns true between a successful connect and close.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(P2pError::TransportUnavailable(
                "memory transport not connected".into(),
            ))
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, address: &str) -> Result<()> {
        if !address.starts_with(MEMORY_SCHEME) {
            return Err(P2pError::TransportUnavailable(format!(
                "unsupported address {address:?}, expected {MEMORY_SCHEME}..."
            )));
        }
        self.bus.ensure_available()?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.ensure_connected()?;
        self.published.fetch_add(1, Ordering::SeqCst);
        self.bus.publish(topic, payload)?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        self.ensure_connected()?;
        self.bus.ensure_available()?;
        let subscription = self.bus.subscribe(topic);
        self.subscriptions.lock().push(subscription.id);
        Ok(subscription)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.subscriptions.lock().retain(|s| *s != id);
        self.bus.unsubscribe(id);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let ids: Vec<_> = self.subscriptions.lock().drain(..).collect();
        for id in ids {
            self.bus.unsubscribe(id);
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
