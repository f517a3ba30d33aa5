//! # In-Memory Session Store
//!
//! Server-side session storage behind the registration, lookup and update
//! callbacks.
//!
//! ## Features
//! - **Lookup by salt**: a Data packet is matched by its header salt, which is
//!   always a salt this side issued (Htua or an earlier outgoing Data)
//! - **Peer binding**: a salt only resolves for the address it was issued to
//! - **Replay window**: salts embedded by the peer are accepted once
//! - **Auth replay rejection**: an Auth whose salt this session already saw
//!   leaves the live session untouched
//! - **TTL expiration**: idle sessions are forgotten after `session_ttl`, and
//!   every registration sweeps expired entries
//! - **Capacity bound**: registrations beyond `max_sessions` are refused
//!
//! ## Usage
//! ```rust,no_run
//! use secure_datagram::config::SecurityConfig;
//! use secure_datagram::protocol::{Callbacks, MemorySessionStore};
//! use secure_datagram::utils::KeyPair;
//! use std::sync::Arc;
//!
//! let keys = Arc::new(KeyPair::generate());
//! let store = Arc::new(MemorySessionStore::new(&SecurityConfig::default()));
//! let callbacks = store.install(Callbacks::with_key_pair(keys));
//! ```

use super::callbacks::{Callbacks, NewSession};
use crate::config::SecurityConfig;
use crate::core::packet::{Data, Salt};
use crate::error::{constants, ProtocolError, Result};
use crate::transport::lock;
use crate::utils::crypto::generate_salt;
use crate::utils::keys::SessionKey;
use crate::utils::metrics::global_metrics;
use crate::utils::replay_window::SaltWindow;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use x25519_dalek::PublicKey;

/// Salts this side issued that a peer may still encrypt under
const ISSUED_SALT_HISTORY: usize = 8;

#[derive(Debug)]
struct SessionEntry {
    key: SessionKey,
    public_key: PublicKey,
    /// Salt of the Auth that created this entry
    auth_salt: Salt,
    /// Latest salt received from the peer; encrypts the next outgoing Data
    peer_salt: Salt,
    issued: VecDeque<Salt>,
    window: SaltWindow,
    last_seen: Instant,
}

impl SessionEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.last_seen.elapsed() > ttl
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    sessions: HashMap<SocketAddr, SessionEntry>,
    by_salt: HashMap<Salt, SocketAddr>,
}

impl StoreInner {
    fn forget(&mut self, peer: &SocketAddr) -> Option<SessionEntry> {
        let entry = self.sessions.remove(peer)?;
        for salt in &entry.issued {
            if self.by_salt.get(salt) == Some(peer) {
                self.by_salt.remove(salt);
            }
        }
        Some(entry)
    }

    fn purge(&mut self, ttl: Duration) -> usize {
        let expired: Vec<SocketAddr> = self
            .sessions
            .iter()
            .filter(|(_, e)| e.is_expired(ttl))
            .map(|(peer, _)| *peer)
            .collect();
        for peer in &expired {
            self.forget(peer);
        }
        if !expired.is_empty() {
            debug!(removed = expired.len(), "Purged expired sessions");
        }
        expired.len()
    }

    fn issue(&mut self, peer: SocketAddr, salt: Salt) {
        let Some(entry) = self.sessions.get_mut(&peer) else {
            return;
        };
        entry.issued.push_back(salt);
        let expired = if entry.issued.len() > ISSUED_SALT_HISTORY {
            entry.issued.pop_front()
        } else {
            None
        };
        self.by_salt.insert(salt, peer);
        if let Some(old) = expired {
            if self.by_salt.get(&old) == Some(&peer) {
                self.by_salt.remove(&old);
            }
        }
    }
}

/// Thread-safe session table keyed by peer address
#[derive(Debug)]
pub struct MemorySessionStore {
    inner: Mutex<StoreInner>,
    replay_window: usize,
    max_sessions: usize,
    ttl: Duration,
}

impl MemorySessionStore {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            replay_window: config.replay_window,
            max_sessions: config.max_sessions,
            ttl: config.session_ttl,
        }
    }

    /// Wire this store into the session callbacks of `callbacks`
    pub fn install(self: &Arc<Self>, callbacks: Callbacks) -> Callbacks {
        let create = Arc::clone(self);
        let lookup = Arc::clone(self);
        let update = Arc::clone(self);
        let cleanup = Arc::clone(self);
        callbacks
            .on_session_create(move |_, session| create.register(session))
            .on_session_lookup(move |peer, header| lookup.lookup(peer, header))
            .on_session_update(move |peer, header, next| update.update(peer, header, next))
            .on_cleanup(move || cleanup.clear())
    }

    /// Record a session established by Auth/Htua, replacing any earlier
    /// session for the same address.
    ///
    /// Returns `false` for a replayed Auth (its salt was already seen by the
    /// live session for this peer) or when the table is full. Expired
    /// sessions are swept first.
    pub fn register(&self, session: &NewSession) -> bool {
        let mut inner = lock(&self.inner);
        inner.purge(self.ttl);
        let full = inner.sessions.len() >= self.max_sessions;

        let replacing = match inner.sessions.get_mut(&session.peer) {
            Some(existing) => {
                if existing.auth_salt == session.peer_salt
                    || !existing.window.accept(&session.peer_salt)
                {
                    global_metrics().replay_rejected();
                    debug!(peer = %session.peer, "Replayed auth ignored");
                    return false;
                }
                true
            }
            None if full => {
                warn!(
                    peer = %session.peer,
                    max_sessions = self.max_sessions,
                    "Session table full"
                );
                return false;
            }
            None => false,
        };

        // A replacement keeps the old window so earlier Auth and Data salts
        // stay rejected
        let previous = if replacing {
            inner.forget(&session.peer)
        } else {
            None
        };
        let window = match previous {
            Some(existing) => {
                debug!(peer = %session.peer, "Replacing existing session");
                existing.window
            }
            None => {
                let mut window = SaltWindow::new(self.replay_window);
                window.accept(&session.peer_salt);
                window
            }
        };

        inner.sessions.insert(
            session.peer,
            SessionEntry {
                key: session.session_key.clone(),
                public_key: session.public_key,
                auth_salt: session.peer_salt,
                peer_salt: session.peer_salt,
                issued: VecDeque::with_capacity(ISSUED_SALT_HISTORY + 1),
                window,
                last_seen: Instant::now(),
            },
        );
        inner.issue(session.peer, session.own_salt);
        debug!(peer = %session.peer, sessions = inner.sessions.len(), "Session registered");
        true
    }

    /// Session key for a Data packet from `peer` arriving under `header`
    pub fn lookup(&self, peer: SocketAddr, header: &Salt) -> Option<SessionKey> {
        let mut inner = lock(&self.inner);
        match inner.by_salt.get(header) {
            Some(owner) if *owner == peer => {}
            Some(owner) => {
                debug!(%peer, %owner, "{}", constants::ERR_PEER_MISMATCH);
                return None;
            }
            None => return None,
        }

        let ttl = self.ttl;
        if inner.sessions.get(&peer).is_some_and(|e| e.is_expired(ttl)) {
            inner.forget(&peer);
            debug!(%peer, "Session expired");
            return None;
        }

        let entry = inner.sessions.get_mut(&peer)?;
        entry.last_seen = Instant::now();
        Some(entry.key.clone())
    }

    /// Accept the salt embedded in a decrypted Data packet.
    ///
    /// Returns `false` for an unknown peer or a salt already accepted.
    pub fn update(&self, peer: SocketAddr, header: &Salt, next: &Salt) -> bool {
        let mut inner = lock(&self.inner);
        let Some(entry) = inner.sessions.get_mut(&peer) else {
            return false;
        };
        if !entry.window.accept(next) {
            global_metrics().replay_rejected();
            return false;
        }
        entry.peer_salt = *next;
        entry.last_seen = Instant::now();
        trace!(%peer, header = %hex::encode(header), next = %hex::encode(next), "Peer salt rolled");
        true
    }

    /// Encode a server-initiated Data packet for `peer`.
    ///
    /// Uses the latest salt received from the peer and issues a fresh salt the
    /// peer's reply will arrive under.
    ///
    /// # Errors
    /// `SessionError` if no session exists for `peer`, `CodecError` for an
    /// oversized payload.
    pub fn seal_data(&self, peer: SocketAddr, payload: &[u8]) -> Result<Vec<u8>> {
        let own_salt = generate_salt()?;
        let mut inner = lock(&self.inner);
        let entry = inner
            .sessions
            .get(&peer)
            .ok_or(ProtocolError::SessionError(constants::ERR_UNKNOWN_SALT))?;

        let bytes = Data::new(own_salt, payload).encode(&entry.key, &entry.peer_salt)?;
        inner.issue(peer, own_salt);
        Ok(bytes)
    }

    /// Public key the peer authenticated with
    pub fn public_key(&self, peer: SocketAddr) -> Option<PublicKey> {
        lock(&self.inner).sessions.get(&peer).map(|e| e.public_key)
    }

    pub fn contains(&self, peer: SocketAddr) -> bool {
        lock(&self.inner).sessions.contains_key(&peer)
    }

    pub fn remove(&self, peer: SocketAddr) -> bool {
        lock(&self.inner).forget(&peer).is_some()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every session
    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        inner.sessions.clear();
        inner.by_salt.clear();
    }

    /// Drop every idle session. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        lock(&self.inner).purge(self.ttl)
    }
}
