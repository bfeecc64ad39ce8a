//! # Echo-Net Types
//!
//! Identifiers and time sources shared by every Echo-Net crate.
//!
//! ## Example
//!
//! ```rust
//! use echonet_types::{Clock, ManualClock, NodeId};
//!
//! let id: NodeId = "claude".parse().unwrap();
//! assert_eq!(id.inbox_topic(), "network.claude");
//!
//! let clock = ManualClock::starting_now();
//! let before = clock.now();
//! clock.advance(chrono::Duration::hours(1));
//! assert!(clock.now() > before);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod error;
mod node_id;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{Result, TypesError};
pub use node_id::{NodeId, BROADCAST_TOPIC, TOPIC_PREFIX};
