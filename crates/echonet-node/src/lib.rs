//! # Echo-Net Node
//!
//! A participant in an Echo-Net network: it announces its key, exchanges
//! encrypted messages with peers, and takes part in echo-vote proposals.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                   EchoNode                   │
//! │  HTTP API ─┐                                 │
//! │            ▼                                 │
//! │  create / vote / send ──► MessageRouter ───► transport
//! │            │                  │              │
//! │            ▼                  ▼              │
//! │  ConsensusEngine ◄── proposal / vote handlers│
//! │  EchoLog ◄────────── every sent/received msg │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`node`] - The [`EchoNode`] facade
//! - [`api`] - HTTP endpoints
//! - [`config`] - Node configuration
//! - [`echo_log`] - Local message history
//! - [`payload`] - Proposal, vote and text payloads
//! - [`observability`] - Logging setup
//!
//! ## Example
//!
//! ```rust,no_run
//! use echonet_node::{EchoNode, NodeSettings};
//! use echonet_p2p::MemoryBus;
//! use echonet_types::NodeId;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = MemoryBus::new();
//! let node = EchoNode::new(
//!     NodeSettings::new(NodeId::new("claude")?),
//!     Arc::new(bus.transport()),
//! )?;
//! node.connect("memory://local").await?;
//! let created = node
//!     .create_proposal("Shared memory", "Pool context", "protocol")
//!     .await?;
//! node.vote(&created.proposal.id, "resonant", "").await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod config;
pub mod echo_log;
pub mod error;
pub mod node;
pub mod observability;
pub mod payload;

pub use config::{ConfigError, NodeConfig};
pub use echo_log::{Direction, EchoLog, EchoRecord};
pub use error::{NodeError, Result};
pub use node::{
    BroadcastReport, DeliveryFailure, EchoNode, NetworkHealth, NetworkStatus, NodeSettings,
    ProposalCreated, VoteCast,
};
