//! Publish/subscribe transport abstraction.

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Identifier of one topic subscription.
pub type SubscriptionId = u64;

/// A live subscription to one topic.
///
/// Messages arrive in publish order for this topic. Dropping the receiver
/// stops delivery; the transport prunes it on the next publish.
#[derive(Debug)]
pub struct Subscription {
    /// Subscription handle for [`Transport::unsubscribe`].
    pub id: SubscriptionId,
    /// Topic name.
    pub topic: String,
    /// Incoming payloads.
    pub receiver: mpsc::UnboundedReceiver<Bytes>,
}

/// The publish/subscribe collaborator the router runs on.
///
/// Implementations provide at-least-once delivery per topic and no ordering
/// across topics. They offer no confidentiality or authentication.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Establishes the underlying connection.
    async fn connect(&self, address: &str) -> Result<()>;

    /// Publishes a payload to a topic.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;

    /// Subscribes to a topic.
    async fn subscribe(&self, topic: &str) -> Result<Subscription>;

    /// Cancels a subscription.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    /// Closes the connection and drops all subscriptions.
    async fn close(&self) -> Result<()>;
}
