//! # Echo-Net P2P
//!
//! Secure point-to-point messaging over a shared publish/subscribe transport.
//!
//! - [`PeerDirectory`] maps node ids to their last announced keys.
//! - [`Transport`] abstracts the pub/sub collaborator; [`MemoryBus`] is an
//!   in-process implementation used by tests and the local simulator.
//! - [`MessageRouter`] subscribes to `network.<id>` and `network.broadcast`,
//!   verifies announcements, decrypts envelopes from exactly one sender key
//!   and dispatches payloads to one handler per [`MessageCategory`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod directory;
mod dispatch;
mod error;
mod memory;
mod router;
mod transport;
mod wire;

pub use directory::{AnnounceOutcome, PeerDirectory, PeerRecord};
pub use dispatch::{DispatchMode, OverflowPolicy};
pub use error::{P2pError, Result};
pub use memory::{BusStats, MemoryBus, MemoryTransport, MEMORY_SCHEME};
pub use router::{
    InboundMessage, MessageHandler, MessageRouter, RouterConfig, RouterEvent, RouterState,
    RouterStats,
};
pub use transport::{Subscription, SubscriptionId, Transport};
pub use wire::{
    Announcement, DecryptedMessage, Envelope, MessageCategory, ANNOUNCEMENT_TYPE,
};
