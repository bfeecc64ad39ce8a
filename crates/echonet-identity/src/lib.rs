//! # Echo-Net Identity
//!
//! Ephemeral node identities and the secure channel built on them.
//!
//! Each node holds an X25519 key pair for session-key agreement and an
//! Ed25519 key pair used only to sign its own key announcements. A
//! [`SecureChannel`] derives one AES-256-GCM key per direction for every
//! peer and tracks outbound nonce counters and an inbound replay window.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use echonet_identity::{Identity, SecureChannel};
//! use echonet_types::NodeId;
//!
//! let alice = Arc::new(Identity::generate().unwrap());
//! let bob = Arc::new(Identity::generate().unwrap());
//!
//! let alice_id = NodeId::new("alice").unwrap();
//! let bob_id = NodeId::new("bob").unwrap();
//!
//! let alice_channel = SecureChannel::new(alice.clone());
//! let bob_channel = SecureChannel::new(bob.clone());
//!
//! let sealed = alice_channel
//!     .encrypt(&bob_id, &bob.public_key(), b"hello", b"alice->bob")
//!     .unwrap();
//! let opened = bob_channel
//!     .decrypt(&alice_id, &alice.public_key(), &sealed, b"alice->bob")
//!     .unwrap();
//! assert_eq!(opened, b"hello");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod error;
mod identity;
mod keys;
mod replay;
mod session;

pub use channel::{ChannelConfig, SecureChannel};
pub use error::{IdentityError, Result};
pub use identity::Identity;
pub use keys::{PublicKey, Signature, SigningPublicKey};
pub use replay::ReplayWindow;
pub use session::{Sealed, SessionKey, SessionKeys, NONCE_LEN, TAG_LEN};
