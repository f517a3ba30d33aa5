//! Handshake and session handling.
//!
//! ```text
//! client                                   server
//!   | Hello{client_pk}                  ->   |  valid_key, hello, derive_key
//!   |   <- Olleh{server_pk, flags}           |  sealed with ECDH key, fresh salt
//!   | Auth{client_pk, salt, creds, key} ->   |  valid_creds, session_create
//!   |   <- Htua{new_salt}                    |  sealed with the proposed key
//!   | Data{new_salt, payload}          <->   |  session_lookup, session_update,
//!   |                                        |  data_arrival
//! ```
//!
//! Every sealed message is encrypted under the salt most recently received
//! from the other side and carries a fresh salt for the reply. The server side
//! is [`ServerHandler`]; the client side is the sans-IO [`ClientSession`],
//! wrapped for use in a channel by [`ClientHandler`].
//!
//! A datagram that fails at any step is dropped without a reply. Failures are
//! visible only through debug logging and metrics.

use super::callbacks::{Callbacks, DataFn, NewSession};
use crate::config::SecurityConfig;
use crate::core::packet::{
    peek_type, Auth, Credentials, Data, Hello, Htua, Olleh, PacketType, Salt, ServerInfo,
};
use crate::error::{constants, ProtocolError, Result};
use crate::transport::{lock, DatagramHandler, Message};
use crate::utils::crypto::generate_salt;
use crate::utils::keys::{KeyPair, SessionKey};
use crate::utils::metrics::global_metrics;
use crate::utils::replay_window::SaltWindow;
use std::collections::VecDeque;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, trace};
use x25519_dalek::PublicKey;

/// Salts a client remembers having issued to the server
const ISSUED_SALT_HISTORY: usize = 8;

/// Progress of one client through the handshake, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    Unauthenticated,
    KeyExchanged,
    Authenticated,
    Streaming,
}

/// Record why a datagram was dropped
fn record_drop(err: &ProtocolError, peer: SocketAddr, verbose: bool) {
    let metrics = global_metrics();
    metrics.datagram_dropped();
    match err {
        ProtocolError::Crypto(_) => metrics.crypto_failure(),
        ProtocolError::Rejected(_) => metrics.handshake_rejected(),
        _ => {}
    }
    if verbose {
        debug!(%peer, error = %err, "Datagram dropped");
    } else {
        trace!(%peer, error = %err, "Datagram dropped");
    }
}

fn send_reply(socket: &UdpSocket, reply: &[u8], peer: SocketAddr) {
    match socket.send_to(reply, peer) {
        Ok(sent) => global_metrics().datagram_sent(sent as u64),
        Err(e) => debug!(%peer, error = %e, "Failed to send reply"),
    }
}

/// Server side of the handshake and Data delivery
#[derive(Debug)]
pub struct ServerHandler {
    info: ServerInfo,
    callbacks: Callbacks,
    debug: bool,
}

impl ServerHandler {
    pub fn new(info: ServerInfo, callbacks: Callbacks) -> Self {
        Self {
            info,
            callbacks,
            debug: false,
        }
    }

    /// Server advertising `key_pair`'s public key and the login policy of
    /// `security`
    pub fn from_config(key_pair: &KeyPair, security: &SecurityConfig, callbacks: Callbacks) -> Self {
        Self::new(
            ServerInfo {
                public_key: *key_pair.public(),
                need_login: security.need_login,
                need_pass: security.need_pass,
            },
            callbacks,
        )
    }

    /// Log every dropped datagram at debug level instead of trace
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Handle one datagram from `peer`, returning the reply to send, if any
    pub fn process(&self, bytes: &[u8], peer: SocketAddr) -> Result<Option<Vec<u8>>> {
        match peek_type(bytes)? {
            PacketType::Hello => self.on_hello(bytes, peer).map(Some),
            PacketType::Auth => self.on_auth(bytes, peer).map(Some),
            PacketType::Data => self.on_data(bytes, peer).map(|()| None),
            other => Err(ProtocolError::InvalidPacketType(other as u32)),
        }
    }

    #[instrument(level = "debug", skip(self, bytes))]
    fn on_hello(&self, bytes: &[u8], peer: SocketAddr) -> Result<Vec<u8>> {
        let hello = Hello::decode(bytes)?;
        self.callbacks.check_key(&hello.public_key)?;

        let mut info = self.info;
        self.callbacks.hello(peer, &hello.public_key, &mut info)?;

        let key = self.callbacks.derive_key(&hello.public_key)?;
        let reply = Olleh { info }.encode(&key, &generate_salt()?)?;

        global_metrics().hello_answered();
        debug!("Answered hello");
        Ok(reply)
    }

    #[instrument(level = "debug", skip(self, bytes))]
    fn on_auth(&self, bytes: &[u8], peer: SocketAddr) -> Result<Vec<u8>> {
        let Auth {
            public_key,
            salt,
            credentials,
            session_key,
        } = Auth::decode(bytes, |key| {
            self.callbacks.check_key(key)?;
            self.callbacks.derive_key(key)
        })?
        .packet;

        if (self.info.need_login && credentials.login.is_empty())
            || (self.info.need_pass && credentials.pass.is_empty())
        {
            return Err(ProtocolError::Rejected(constants::ERR_CREDENTIALS_REJECTED));
        }
        self.callbacks.check_credentials(peer, &credentials)?;

        let own_salt = generate_salt()?;
        self.callbacks.create_session(&NewSession {
            peer,
            public_key,
            session_key: session_key.clone(),
            peer_salt: salt,
            own_salt,
        })?;

        let reply = Htua { salt: own_salt }.encode(&session_key, &salt)?;
        global_metrics().session_established();
        debug!(login = %credentials.login, "Session established");
        Ok(reply)
    }

    #[instrument(level = "trace", skip(self, bytes))]
    fn on_data(&self, bytes: &[u8], peer: SocketAddr) -> Result<()> {
        let received = Data::decode(bytes, |header| self.callbacks.lookup_session(peer, header))?;
        self.callbacks
            .update_session(peer, &received.header, &received.packet.salt)?;
        self.callbacks.data_arrival(peer, &received.packet.payload);
        global_metrics().data_delivered();
        Ok(())
    }
}

impl DatagramHandler for ServerHandler {
    fn handle(&self, message: &Message, socket: &UdpSocket) {
        let peer = message.peer();
        match self.process(message.bytes(), peer) {
            Ok(Some(reply)) => send_reply(socket, &reply, peer),
            Ok(None) => {}
            Err(e) => record_drop(&e, peer, self.debug),
        }
    }

    fn cleanup(&self) {
        self.callbacks.cleanup();
    }
}

/// Sans-IO client: produces the bytes to send and consumes the bytes received
#[derive(Debug)]
pub struct ClientSession {
    key_pair: KeyPair,
    expected_server: Option<PublicKey>,
    state: SessionState,
    server: Option<ServerInfo>,
    shared_key: Option<SessionKey>,
    session_key: Option<SessionKey>,
    /// Olleh header salt, then the salt carried by the latest Htua or Data
    /// received; seals the next send
    peer_salt: Option<Salt>,
    issued: VecDeque<Salt>,
    window: SaltWindow,
}

impl ClientSession {
    pub fn new(key_pair: KeyPair) -> Self {
        Self {
            key_pair,
            expected_server: None,
            state: SessionState::Unauthenticated,
            server: None,
            shared_key: None,
            session_key: None,
            peer_salt: None,
            issued: VecDeque::with_capacity(ISSUED_SALT_HISTORY + 1),
            window: SaltWindow::default(),
        }
    }

    /// Only accept an Olleh from this pre-shared server key
    pub fn with_server_key(mut self, key: PublicKey) -> Self {
        self.expected_server = Some(key);
        self
    }

    pub fn with_replay_window(mut self, capacity: usize) -> Self {
        self.window = SaltWindow::new(capacity);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn public_key(&self) -> &PublicKey {
        self.key_pair.public()
    }

    /// What the server advertised, once its Olleh was accepted
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server.as_ref()
    }

    fn require(&self, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ProtocolError::SessionError(constants::ERR_WRONG_STATE))
        }
    }

    fn issue(&mut self, salt: Salt) {
        self.issued.push_back(salt);
        if self.issued.len() > ISSUED_SALT_HISTORY {
            self.issued.pop_front();
        }
    }

    fn issued_salt(&self, header: &Salt) -> Result<()> {
        if self.issued.contains(header) {
            Ok(())
        } else {
            Err(ProtocolError::SessionError(constants::ERR_UNKNOWN_SALT))
        }
    }

    /// Encode the opening Hello
    pub fn hello(&self) -> Result<Vec<u8>> {
        self.require(&[SessionState::Unauthenticated])?;
        Hello {
            public_key: *self.key_pair.public(),
        }
        .encode()
    }

    /// Accept the server's Olleh
    #[instrument(level = "debug", skip_all)]
    pub fn handle_olleh(&mut self, bytes: &[u8]) -> Result<ServerInfo> {
        self.require(&[SessionState::Unauthenticated])?;

        let expected = self.expected_server;
        let key_pair = &self.key_pair;
        let mut shared = None;
        let received = Olleh::decode(bytes, |server_key| {
            if expected.is_some_and(|k| k != *server_key) {
                return Err(ProtocolError::SessionError(constants::ERR_SERVER_KEY_MISMATCH));
            }
            let key = key_pair.shared_key(server_key);
            shared = Some(key.clone());
            Ok(key)
        })?;

        let info = received.packet.info;
        self.shared_key = shared;
        self.server = Some(info);
        self.peer_salt = Some(received.header);
        self.state = SessionState::KeyExchanged;
        debug!(need_login = info.need_login, need_pass = info.need_pass, "Key exchanged");
        Ok(info)
    }

    /// Encode Auth, proposing a freshly generated session key.
    ///
    /// May be called again before Htua arrives; the newest proposal wins.
    pub fn auth(&mut self, credentials: Credentials) -> Result<Vec<u8>> {
        self.auth_with_key(credentials, SessionKey::generate())
    }

    /// Encode Auth proposing `session_key`
    pub fn auth_with_key(&mut self, credentials: Credentials, session_key: SessionKey) -> Result<Vec<u8>> {
        self.require(&[SessionState::KeyExchanged])?;
        let (Some(shared), Some(seal_salt)) = (&self.shared_key, self.peer_salt) else {
            return Err(ProtocolError::SessionError(constants::ERR_WRONG_STATE));
        };

        let salt = generate_salt()?;
        let bytes = Auth {
            public_key: *self.key_pair.public(),
            salt,
            credentials,
            session_key: session_key.clone(),
        }
        .encode(shared, &seal_salt)?;

        self.session_key = Some(session_key);
        self.issue(salt);
        Ok(bytes)
    }

    /// Accept the server's Htua
    #[instrument(level = "debug", skip_all)]
    pub fn handle_htua(&mut self, bytes: &[u8]) -> Result<()> {
        self.require(&[SessionState::KeyExchanged])?;
        let key = self
            .session_key
            .as_ref()
            .ok_or(ProtocolError::SessionError(constants::ERR_EMPTY_SESSION_KEY))?;

        let received = Htua::decode(bytes, key)?;
        self.issued_salt(&received.header)?;
        if !self.window.accept(&received.packet.salt) {
            return Err(ProtocolError::SessionError(constants::ERR_REPLAYED_SALT));
        }

        self.peer_salt = Some(received.packet.salt);
        self.state = SessionState::Authenticated;
        debug!("Authenticated");
        Ok(())
    }

    /// Encode a Data packet carrying `payload`
    pub fn seal_data(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        self.require(&[SessionState::Authenticated, SessionState::Streaming])?;
        let (Some(key), Some(seal_salt)) = (&self.session_key, self.peer_salt) else {
            return Err(ProtocolError::SessionError(constants::ERR_EMPTY_SESSION_KEY));
        };

        let salt = generate_salt()?;
        let bytes = Data::new(salt, payload).encode(key, &seal_salt)?;
        self.issue(salt);
        self.state = SessionState::Streaming;
        Ok(bytes)
    }

    /// Decrypt a Data packet pushed by the server, returning its payload
    pub fn open_data(&mut self, bytes: &[u8]) -> Result<Vec<u8>> {
        self.require(&[SessionState::Authenticated, SessionState::Streaming])?;
        let key = self
            .session_key
            .clone()
            .ok_or(ProtocolError::SessionError(constants::ERR_EMPTY_SESSION_KEY))?;

        let received = Data::decode(bytes, |header| {
            self.issued_salt(header)?;
            Ok(key)
        })?;
        if !self.window.accept(&received.packet.salt) {
            global_metrics().replay_rejected();
            return Err(ProtocolError::SessionError(constants::ERR_REPLAYED_SALT));
        }

        self.peer_salt = Some(received.packet.salt);
        self.state = SessionState::Streaming;
        Ok(received.packet.payload)
    }

    /// Feed any received packet; returns a Data payload when one arrives
    pub fn receive(&mut self, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        match peek_type(bytes)? {
            PacketType::Olleh => self.handle_olleh(bytes).map(|_| None),
            PacketType::Htua => self.handle_htua(bytes).map(|()| None),
            PacketType::Data => self.open_data(bytes).map(Some),
            other => Err(ProtocolError::InvalidPacketType(other as u32)),
        }
    }
}

/// [`ClientSession`] shared between a channel's workers and the application
pub struct ClientHandler {
    session: Mutex<ClientSession>,
    server: SocketAddr,
    changed: Condvar,
    on_data: Option<Box<DataFn>>,
    debug: bool,
}

impl ClientHandler {
    /// Handler accepting packets only from `server`
    pub fn new(session: ClientSession, server: SocketAddr) -> Self {
        Self {
            session: Mutex::new(session),
            server,
            changed: Condvar::new(),
            on_data: None,
            debug: false,
        }
    }

    pub fn on_data<F>(mut self, f: F) -> Self
    where
        F: Fn(SocketAddr, &[u8]) + Send + Sync + 'static,
    {
        self.on_data = Some(Box::new(f));
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Lock the session to encode Hello, Auth or Data
    pub fn session(&self) -> MutexGuard<'_, ClientSession> {
        lock(&self.session)
    }

    pub fn state(&self) -> SessionState {
        self.session().state()
    }

    /// Block until the session reaches `target` (or a later state).
    ///
    /// A timeout too large to represent as an `Instant` waits forever.
    ///
    /// # Errors
    /// `Timeout` if `timeout` elapses first.
    pub fn wait_for(&self, target: SessionState, timeout: Duration) -> Result<()> {
        let deadline = Instant::now().checked_add(timeout);
        let mut session = self.session();
        while session.state() < target {
            session = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(ProtocolError::Timeout);
                    }
                    match self.changed.wait_timeout(session, remaining) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
                None => match self.changed.wait(session) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                },
            };
        }
        Ok(())
    }
}

impl DatagramHandler for ClientHandler {
    fn handle(&self, message: &Message, _socket: &UdpSocket) {
        let peer = message.peer();
        if peer != self.server {
            record_drop(
                &ProtocolError::SessionError(constants::ERR_PEER_MISMATCH),
                peer,
                self.debug,
            );
            return;
        }

        let outcome = self.session().receive(message.bytes());
        match outcome {
            Ok(payload) => {
                self.changed.notify_all();
                if let Some(payload) = payload {
                    global_metrics().data_delivered();
                    if let Some(f) = &self.on_data {
                        f(peer, &payload);
                    }
                }
            }
            Err(e) => record_drop(&e, peer, self.debug),
        }
    }
}

impl std::fmt::Debug for ClientHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandler")
            .field("server", &self.server)
            .field("state", &self.state())
            .field("on_data", &self.on_data.is_some())
            .finish()
    }
}
