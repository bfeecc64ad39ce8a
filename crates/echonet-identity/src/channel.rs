//! Per-peer secure channel state.

use crate::{Identity, IdentityError, PublicKey, ReplayWindow, Result, Sealed, SessionKeys, NONCE_LEN};
use echonet_types::NodeId;
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;

/// Channel tuning.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Number of inbound nonce counters remembered per peer.
    pub replay_window: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            replay_window: 1024,
        }
    }
}

#[derive(Debug)]
struct Session {
    peer_key: PublicKey,
    keys: SessionKeys,
    next_counter: u64,
    replay: ReplayWindow,
}

/// Authenticated encryption with every known peer.
///
/// Session keys are cached per peer id together with the peer key they were
/// derived from. When a peer announces a new key the cached session is
/// discarded and rebuilt, resetting its nonce counter and replay window.
#[derive(Debug)]
pub struct SecureChannel {
    identity: Arc<Identity>,
    config: ChannelConfig,
    sessions: Mutex<HashMap<NodeId, Session>>,
}

impl SecureChannel {
    /// Creates a channel with default settings.
    #[must_use]
    pub fn new(identity: Arc<Identity>) -> Self {
        Self::with_config(identity, ChannelConfig::default())
    }

    /// Creates a channel with explicit settings.
    #[must_use]
    pub fn with_config(identity: Arc<Identity>, config: ChannelConfig) -> Self {
        Self {
            identity,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the local identity.
    #[must_use]
    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    /// Derives the session keys for a peer key without caching them.
    ///
    /// # Errors
    ///
    /// Returns an error if key agreement fails.
    pub fn derive_session_keys(&self, peer_key: &PublicKey) -> Result<SessionKeys> {
        SessionKeys::derive(&self.identity, peer_key)
    }

    /// Encrypts `plaintext` for `peer`.
    ///
    /// The nonce is the next value of the per-peer counter followed by four
    /// random bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if key agreement fails, the counter is exhausted, or
    /// the cipher fails.
    pub fn encrypt(
        &self,
        peer: &NodeId,
        peer_key: &PublicKey,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Sealed> {
        let mut sessions = self.sessions.lock();
        let session = self.session_for(&mut sessions, peer, peer_key)?;

        let counter = session.next_counter;
        session.next_counter = counter
            .checked_add(1)
            .ok_or_else(|| IdentityError::Encryption("nonce counter exhausted".into()))?;

        let mut nonce = [0u8; NONCE_LEN];
        nonce[..8].copy_from_slice(&counter.to_be_bytes());
        rand::thread_rng().fill_bytes(&mut nonce[8..]);

        session.keys.outbound.seal(nonce, plaintext, aad)
    }

    /// Decrypts a message sealed by `peer`.
    ///
    /// The tag is verified before the replay window is consulted, so forged
    /// envelopes cannot advance the window.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::AuthenticationFailure`] on tag mismatch or a
    /// replayed nonce. No plaintext is returned in either case.
    pub fn decrypt(
        &self,
        peer: &NodeId,
        peer_key: &PublicKey,
        sealed: &Sealed,
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        let mut sessions = self.sessions.lock();
        let session = self.session_for(&mut sessions, peer, peer_key)?;

        if !session.replay.check(sealed.counter()) {
            return Err(IdentityError::AuthenticationFailure(format!(
                "replayed nonce counter {}",
                sealed.counter()
            )));
        }

        let plaintext = session.keys.inbound.open(sealed, aad)?;
        session.replay.accept(sealed.counter());
        Ok(plaintext)
    }

    /// Drops any cached session for `peer`.
    pub fn forget(&self, peer: &NodeId) {
        self.sessions.lock().remove(peer);
    }

    /// Number of cached peer sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    fn session_for<'a>(
        &self,
        sessions: &'a mut HashMap<NodeId, Session>,
        peer: &NodeId,
        peer_key: &PublicKey,
    ) -> Result<&'a mut Session> {
        let stale = sessions
            .get(peer)
            .is_some_and(|session| session.peer_key != *peer_key);
        if stale {
            tracing::debug!(peer = %peer, "peer key changed, rebuilding session");
            sessions.remove(peer);
        }

        if !sessions.contains_key(peer) {
            let keys = SessionKeys::derive(&self.identity, peer_key)?;
            tracing::debug!(peer = %peer, key = %peer_key.short_id(), "derived session keys");
            sessions.insert(
                peer.clone(),
                Session {
                    peer_key: *peer_key,
                    keys,
                    next_counter: 0,
                    replay: ReplayWindow::new(self.config.replay_window),
                },
            );
        }

        sessions
            .get_mut(peer)
            .ok_or_else(|| IdentityError::Encryption("session missing".into()))
    }
}
