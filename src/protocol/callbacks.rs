//! Handshake and session callbacks.
//!
//! The core keeps no session table. Policy and storage are supplied as
//! callbacks, each a boxed `Fn` invoked synchronously on a worker thread.
//!
//! | Callback        | Unset behaviour | Invoked on                        |
//! |-----------------|-----------------|-----------------------------------|
//! | valid_key       | accept          | Hello, Auth                       |
//! | hello           | accept          | Hello (may rewrite the ServerInfo)|
//! | valid_creds     | accept          | Auth                              |
//! | derive_key      | fail closed     | Hello, Auth                       |
//! | session_create  | accept          | Auth                              |
//! | session_lookup  | fail closed     | Data                              |
//! | session_update  | accept          | Data                              |
//! | data_arrival    | ignore          | Data                              |
//! | cleanup         | ignore          | channel stop                      |

use crate::core::packet::{Credentials, Salt, ServerInfo};
use crate::error::{constants, ProtocolError, Result};
use crate::utils::keys::{KeyPair, SessionKey};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use x25519_dalek::PublicKey;

pub type ValidKeyFn = dyn Fn(&PublicKey) -> bool + Send + Sync + 'static;
pub type HelloFn = dyn Fn(SocketAddr, &PublicKey, &mut ServerInfo) -> bool + Send + Sync + 'static;
pub type ValidCredsFn = dyn Fn(SocketAddr, &Credentials) -> bool + Send + Sync + 'static;
pub type KeyDerivationFn = dyn Fn(&PublicKey) -> Result<SessionKey> + Send + Sync + 'static;
pub type SessionCreateFn = dyn Fn(SocketAddr, &NewSession) -> bool + Send + Sync + 'static;
pub type SessionLookupFn = dyn Fn(SocketAddr, &Salt) -> Option<SessionKey> + Send + Sync + 'static;
pub type SessionUpdateFn = dyn Fn(SocketAddr, &Salt, &Salt) -> bool + Send + Sync + 'static;
pub type DataFn = dyn Fn(SocketAddr, &[u8]) + Send + Sync + 'static;
pub type CleanupFn = dyn Fn() + Send + Sync + 'static;

/// Everything a session store needs when Auth succeeds
#[derive(Debug, Clone)]
pub struct NewSession {
    pub peer: SocketAddr,
    pub public_key: PublicKey,
    pub session_key: SessionKey,
    /// Salt carried in the client's Auth; the next outgoing message uses it
    pub peer_salt: Salt,
    /// Salt sent back in Htua; the client's first Data arrives under it
    pub own_salt: Salt,
}

/// Registry of optional callbacks
#[derive(Default)]
pub struct Callbacks {
    valid_key: Option<Box<ValidKeyFn>>,
    hello: Option<Box<HelloFn>>,
    valid_creds: Option<Box<ValidCredsFn>>,
    derive_key: Option<Box<KeyDerivationFn>>,
    session_create: Option<Box<SessionCreateFn>>,
    session_lookup: Option<Box<SessionLookupFn>>,
    session_update: Option<Box<SessionUpdateFn>>,
    data_arrival: Option<Box<DataFn>>,
    cleanup: Option<Box<CleanupFn>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose key derivation is X25519 with `key_pair`
    pub fn with_key_pair(key_pair: Arc<KeyPair>) -> Self {
        Self::new().on_derive_key(move |peer| Ok(key_pair.shared_key(peer)))
    }

    pub fn on_valid_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&PublicKey) -> bool + Send + Sync + 'static,
    {
        self.valid_key = Some(Box::new(f));
        self
    }

    pub fn on_hello<F>(mut self, f: F) -> Self
    where
        F: Fn(SocketAddr, &PublicKey, &mut ServerInfo) -> bool + Send + Sync + 'static,
    {
        self.hello = Some(Box::new(f));
        self
    }

    pub fn on_valid_creds<F>(mut self, f: F) -> Self
    where
        F: Fn(SocketAddr, &Credentials) -> bool + Send + Sync + 'static,
    {
        self.valid_creds = Some(Box::new(f));
        self
    }

    pub fn on_derive_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&PublicKey) -> Result<SessionKey> + Send + Sync + 'static,
    {
        self.derive_key = Some(Box::new(f));
        self
    }

    pub fn on_session_create<F>(mut self, f: F) -> Self
    where
        F: Fn(SocketAddr, &NewSession) -> bool + Send + Sync + 'static,
    {
        self.session_create = Some(Box::new(f));
        self
    }

    pub fn on_session_lookup<F>(mut self, f: F) -> Self
    where
        F: Fn(SocketAddr, &Salt) -> Option<SessionKey> + Send + Sync + 'static,
    {
        self.session_lookup = Some(Box::new(f));
        self
    }

    pub fn on_session_update<F>(mut self, f: F) -> Self
    where
        F: Fn(SocketAddr, &Salt, &Salt) -> bool + Send + Sync + 'static,
    {
        self.session_update = Some(Box::new(f));
        self
    }

    pub fn on_data<F>(mut self, f: F) -> Self
    where
        F: Fn(SocketAddr, &[u8]) + Send + Sync + 'static,
    {
        self.data_arrival = Some(Box::new(f));
        self
    }

    /// Release whatever the other callbacks hold once the server stops
    pub fn on_cleanup<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.cleanup = Some(Box::new(f));
        self
    }

    pub(crate) fn check_key(&self, key: &PublicKey) -> Result<()> {
        match &self.valid_key {
            Some(f) if !f(key) => Err(ProtocolError::Rejected(constants::ERR_KEY_REJECTED)),
            _ => Ok(()),
        }
    }

    pub(crate) fn hello(&self, peer: SocketAddr, key: &PublicKey, info: &mut ServerInfo) -> Result<()> {
        match &self.hello {
            Some(f) if !f(peer, key, info) => {
                Err(ProtocolError::Rejected(constants::ERR_HELLO_REJECTED))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn check_credentials(&self, peer: SocketAddr, creds: &Credentials) -> Result<()> {
        match &self.valid_creds {
            Some(f) if !f(peer, creds) => {
                Err(ProtocolError::Rejected(constants::ERR_CREDENTIALS_REJECTED))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn derive_key(&self, key: &PublicKey) -> Result<SessionKey> {
        match &self.derive_key {
            Some(f) => f(key),
            None => Err(ProtocolError::SessionError(constants::ERR_NO_KEY_DERIVATION)),
        }
    }

    pub(crate) fn create_session(&self, session: &NewSession) -> Result<()> {
        match &self.session_create {
            Some(f) if !f(session.peer, session) => {
                Err(ProtocolError::Rejected(constants::ERR_SESSION_REJECTED))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn lookup_session(&self, peer: SocketAddr, header: &Salt) -> Result<SessionKey> {
        match &self.session_lookup {
            Some(f) => f(peer, header).ok_or(ProtocolError::SessionError(constants::ERR_UNKNOWN_SALT)),
            None => Err(ProtocolError::SessionError(constants::ERR_NO_SESSION_LOOKUP)),
        }
    }

    pub(crate) fn update_session(&self, peer: SocketAddr, header: &Salt, next: &Salt) -> Result<()> {
        match &self.session_update {
            Some(f) if !f(peer, header, next) => {
                Err(ProtocolError::SessionError(constants::ERR_REPLAYED_SALT))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn data_arrival(&self, peer: SocketAddr, payload: &[u8]) {
        if let Some(f) = &self.data_arrival {
            f(peer, payload);
        }
    }

    pub(crate) fn cleanup(&self) {
        if let Some(f) = &self.cleanup {
            f();
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("valid_key", &self.valid_key.is_some())
            .field("hello", &self.hello.is_some())
            .field("valid_creds", &self.valid_creds.is_some())
            .field("derive_key", &self.derive_key.is_some())
            .field("session_create", &self.session_create.is_some())
            .field("session_lookup", &self.session_lookup.is_some())
            .field("session_update", &self.session_update.is_some())
            .field("data_arrival", &self.data_arrival.is_some())
            .field("cleanup", &self.cleanup.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[test]
    fn test_optional_callbacks_pass_when_unset() {
        let cb = Callbacks::new();
        let key = *KeyPair::generate().public();
        let mut info = ServerInfo {
            public_key: key,
            need_login: false,
            need_pass: false,
        };
        assert!(cb.check_key(&key).is_ok());
        assert!(cb.hello(peer(), &key, &mut info).is_ok());
        assert!(cb.check_credentials(peer(), &Credentials::default()).is_ok());
        assert!(cb.update_session(peer(), &[0u8; 8], &[1u8; 8]).is_ok());
        cb.data_arrival(peer(), b"ignored");
        cb.cleanup();
    }

    #[test]
    fn test_mandatory_callbacks_fail_closed() {
        let cb = Callbacks::new();
        let key = *KeyPair::generate().public();
        assert!(matches!(
            cb.derive_key(&key),
            Err(ProtocolError::SessionError(constants::ERR_NO_KEY_DERIVATION))
        ));
        assert!(matches!(
            cb.lookup_session(peer(), &[0u8; 8]),
            Err(ProtocolError::SessionError(constants::ERR_NO_SESSION_LOOKUP))
        ));
    }

    #[test]
    fn test_registered_rejections() {
        let cb = Callbacks::new()
            .on_valid_key(|_| false)
            .on_valid_creds(|_, creds| creds.login == "admin")
            .on_session_lookup(|_, _| None);
        let key = *KeyPair::generate().public();

        assert!(matches!(
            cb.check_key(&key),
            Err(ProtocolError::Rejected(constants::ERR_KEY_REJECTED))
        ));
        assert!(cb
            .check_credentials(peer(), &Credentials::new("admin", ""))
            .is_ok());
        assert!(cb
            .check_credentials(peer(), &Credentials::new("guest", ""))
            .is_err());
        assert!(matches!(
            cb.lookup_session(peer(), &[0u8; 8]),
            Err(ProtocolError::SessionError(constants::ERR_UNKNOWN_SALT))
        ));
    }

    #[test]
    fn test_key_pair_derivation_matches_peer() {
        let server = Arc::new(KeyPair::generate());
        let client = KeyPair::generate();
        let cb = Callbacks::with_key_pair(Arc::clone(&server));
        let derived = cb.derive_key(client.public()).unwrap();
        assert_eq!(derived, client.shared_key(server.public()));
    }
}
