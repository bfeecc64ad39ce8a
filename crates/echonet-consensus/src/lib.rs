//! # Echo-Net Consensus
//!
//! Lightweight quorum decisions by echo votes.
//!
//! A node creates a [`Proposal`]; peers answer with an [`EchoKind`]. The
//! [`Tally`] reports the share of each kind, and a proposal converges as
//! soon as one kind holds at least the configured threshold (80% by
//! default) of all votes and the vote count reaches the quorum (1 by
//! default). Proposals that reach their deadline first expire.
//!
//! ## Proposal lifecycle
//!
//! ```text
//! Draft ──► Active ──┬──► Converged
//!                    ├──► Expired
//!                    └──► Failed (withdrawn)
//! ```
//!
//! `Draft` is never observable outside [`ConsensusEngine::create`]. Terminal
//! proposals move to a bounded history and accept no further votes.
//!
//! ## Example
//!
//! ```rust
//! use echonet_consensus::{ConsensusEngine, EchoKind, EngineConfig, ProposalStatus};
//! use echonet_types::NodeId;
//!
//! let mut engine = ConsensusEngine::new(EngineConfig {
//!     quorum: 3,
//!     ..EngineConfig::default()
//! });
//! let proposer = NodeId::new("claude").unwrap();
//! let proposal = engine
//!     .create(&proposer, "Adopt echo protocol", "Use echoes for decisions", "protocol", None)
//!     .unwrap();
//!
//! for voter in ["a", "b", "c"] {
//!     let voter = NodeId::new(voter).unwrap();
//!     engine.submit_vote(&proposal.id, &voter, EchoKind::Resonant, "").unwrap();
//! }
//!
//! let view = engine.status(&proposal.id).unwrap();
//! assert_eq!(view.proposal.status, ProposalStatus::Converged);
//! assert_eq!(view.tally.consensus_strength, 100.0);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod echo;
mod engine;
mod error;
mod proposal;
mod store;
mod tally;

pub use echo::{EchoKind, EchoResponse};
pub use engine::{ConsensusEngine, EngineConfig, ImportOutcome, ProposalView, VoteOutcome};
pub use error::{ConsensusError, Result};
pub use proposal::{Proposal, ProposalId, ProposalStatus};
pub use store::ProposalStore;
pub use tally::Tally;

/// Default share of votes one echo kind needs for convergence.
pub const DEFAULT_CONVERGENCE_THRESHOLD: f64 = 0.8;

/// Default proposal lifetime in hours.
pub const DEFAULT_PROPOSAL_HOURS: i64 = 24;
