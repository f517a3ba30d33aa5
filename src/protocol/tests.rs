// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::config::SecurityConfig;
use crate::core::packet::{peek_type, Credentials, Olleh, PacketType};
use crate::error::{constants, ProtocolError};
use crate::protocol::callbacks::Callbacks;
use crate::protocol::handshake::*;
use crate::protocol::session_store::MemorySessionStore;
use crate::utils::keys::KeyPair;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn server_keys() -> Arc<KeyPair> {
    Arc::new(KeyPair::from_secret_bytes([1u8; 32]))
}

fn client_keys() -> KeyPair {
    KeyPair::from_secret_bytes([2u8; 32])
}

fn client_addr() -> SocketAddr {
    "127.0.0.1:40001".parse().unwrap()
}

type Inbox = Arc<Mutex<Vec<(SocketAddr, Vec<u8>)>>>;

struct Server {
    handler: ServerHandler,
    store: Arc<MemorySessionStore>,
    inbox: Inbox,
}

fn server(security: SecurityConfig, extra: impl FnOnce(Callbacks) -> Callbacks) -> Server {
    let keys = server_keys();
    let store = Arc::new(MemorySessionStore::new(&security));
    let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&inbox);
    let callbacks = extra(store.install(Callbacks::with_key_pair(Arc::clone(&keys))))
        .on_data(move |peer, payload| sink.lock().unwrap().push((peer, payload.to_vec())));

    Server {
        handler: ServerHandler::from_config(&keys, &security, callbacks),
        store,
        inbox,
    }
}

/// Drive a client through Hello/Olleh/Auth/Htua against `server`
fn establish(server: &Server, creds: Credentials) -> ClientSession {
    let mut client = ClientSession::new(client_keys()).with_server_key(*server_keys().public());
    let olleh = server
        .handler
        .process(&client.hello().unwrap(), client_addr())
        .unwrap()
        .unwrap();
    client.handle_olleh(&olleh).unwrap();

    let htua = server
        .handler
        .process(&client.auth(creds).unwrap(), client_addr())
        .unwrap()
        .unwrap();
    client.handle_htua(&htua).unwrap();
    client
}

#[test]
fn test_full_handshake_and_data() {
    let server = server(SecurityConfig::default(), |cb| cb);
    let mut client = establish(&server, Credentials::new("alice", "pw"));
    assert_eq!(client.state(), SessionState::Authenticated);
    assert!(server.store.contains(client_addr()));

    let data = client.seal_data(b"first payload").unwrap();
    assert_eq!(client.state(), SessionState::Streaming);
    assert_eq!(server.handler.process(&data, client_addr()).unwrap(), None);

    let inbox = server.inbox.lock().unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0], (client_addr(), b"first payload".to_vec()));
}

#[test]
fn test_olleh_advertises_server_key_and_flags() {
    let security = SecurityConfig {
        need_login: true,
        need_pass: false,
        ..SecurityConfig::default()
    };
    let server = server(security, |cb| cb);
    let client = ClientSession::new(client_keys());
    let olleh = server
        .handler
        .process(&client.hello().unwrap(), client_addr())
        .unwrap()
        .unwrap();

    assert_eq!(peek_type(&olleh).unwrap(), PacketType::Olleh);
    let keys = client_keys();
    let decoded = Olleh::decode(&olleh, |pk| Ok(keys.shared_key(pk))).unwrap();
    assert_eq!(decoded.packet.info.public_key, *server_keys().public());
    assert!(decoded.packet.info.need_login);
    assert!(!decoded.packet.info.need_pass);
}

#[test]
fn test_rejected_credentials_produce_no_reply() {
    let server = server(SecurityConfig::default(), |cb| {
        cb.on_valid_creds(|_, creds| creds.pass == "correct")
    });
    let mut client = ClientSession::new(client_keys());
    let olleh = server
        .handler
        .process(&client.hello().unwrap(), client_addr())
        .unwrap()
        .unwrap();
    client.handle_olleh(&olleh).unwrap();

    let auth = client.auth(Credentials::new("mallory", "wrong")).unwrap();
    let result = server.handler.process(&auth, client_addr());
    assert!(matches!(
        result,
        Err(ProtocolError::Rejected(constants::ERR_CREDENTIALS_REJECTED))
    ));
    assert!(server.store.is_empty());
    assert_eq!(client.state(), SessionState::KeyExchanged);
}

#[test]
fn test_missing_login_rejected_when_required() {
    let security = SecurityConfig {
        need_login: true,
        ..SecurityConfig::default()
    };
    let server = server(security, |cb| cb);
    let mut client = ClientSession::new(client_keys());
    let olleh = server
        .handler
        .process(&client.hello().unwrap(), client_addr())
        .unwrap()
        .unwrap();
    client.handle_olleh(&olleh).unwrap();

    let auth = client.auth(Credentials::default()).unwrap();
    assert!(matches!(
        server.handler.process(&auth, client_addr()),
        Err(ProtocolError::Rejected(_))
    ));
}

#[test]
fn test_replayed_data_delivered_once() {
    let server = server(SecurityConfig::default(), |cb| cb);
    let mut client = establish(&server, Credentials::new("alice", "pw"));

    let data = client.seal_data(b"once").unwrap();
    server.handler.process(&data, client_addr()).unwrap();
    assert!(matches!(
        server.handler.process(&data, client_addr()),
        Err(ProtocolError::SessionError(constants::ERR_REPLAYED_SALT))
    ));
    assert_eq!(server.inbox.lock().unwrap().len(), 1);
}

#[test]
fn test_replayed_auth_leaves_session_intact() {
    let server = server(SecurityConfig::default(), |cb| cb);
    let mut client = ClientSession::new(client_keys()).with_server_key(*server_keys().public());
    let olleh = server
        .handler
        .process(&client.hello().unwrap(), client_addr())
        .unwrap()
        .unwrap();
    client.handle_olleh(&olleh).unwrap();

    let auth = client.auth(Credentials::new("alice", "pw")).unwrap();
    let htua = server.handler.process(&auth, client_addr()).unwrap().unwrap();
    client.handle_htua(&htua).unwrap();

    let data = client.seal_data(b"before").unwrap();
    server.handler.process(&data, client_addr()).unwrap();

    assert!(matches!(
        server.handler.process(&auth, client_addr()),
        Err(ProtocolError::Rejected(constants::ERR_SESSION_REJECTED))
    ));

    let data = client.seal_data(b"after").unwrap();
    assert_eq!(server.handler.process(&data, client_addr()).unwrap(), None);
    let inbox = server.inbox.lock().unwrap();
    assert_eq!(inbox.len(), 2);
    assert_eq!(inbox[1].1, b"after");
}

#[test]
fn test_fresh_auth_replaces_session() {
    let server = server(SecurityConfig::default(), |cb| cb);
    let mut client = establish(&server, Credentials::new("alice", "pw"));
    let data = client.seal_data(b"old").unwrap();
    server.handler.process(&data, client_addr()).unwrap();

    let mut again = establish(&server, Credentials::new("alice", "pw"));
    assert_eq!(server.store.len(), 1);
    let data = again.seal_data(b"new").unwrap();
    server.handler.process(&data, client_addr()).unwrap();
    assert_eq!(server.inbox.lock().unwrap()[1].1, b"new");
}

#[test]
fn test_wait_for_without_deadline() {
    let handler = ClientHandler::new(ClientSession::new(client_keys()), client_addr());
    assert!(handler
        .wait_for(SessionState::Unauthenticated, Duration::MAX)
        .is_ok());
}

#[test]
fn test_one_directional_stream() {
    let server = server(SecurityConfig::default(), |cb| cb);
    let mut client = establish(&server, Credentials::new("alice", "pw"));

    for i in 0..10u8 {
        let data = client.seal_data(&[i]).unwrap();
        server.handler.process(&data, client_addr()).unwrap();
    }
    let inbox = server.inbox.lock().unwrap();
    let payloads: Vec<Vec<u8>> = inbox.iter().map(|(_, p)| p.clone()).collect();
    assert_eq!(payloads, (0..10u8).map(|i| vec![i]).collect::<Vec<_>>());
}

#[test]
fn test_server_push_and_reply() {
    let server = server(SecurityConfig::default(), |cb| cb);
    let mut client = establish(&server, Credentials::new("alice", "pw"));

    let pushed = server.store.seal_data(client_addr(), b"from server").unwrap();
    assert_eq!(client.open_data(&pushed).unwrap(), b"from server");
    assert!(client.open_data(&pushed).is_err());

    let reply = client.seal_data(b"ack").unwrap();
    server.handler.process(&reply, client_addr()).unwrap();
    assert_eq!(server.inbox.lock().unwrap()[0].1, b"ack");
}

#[test]
fn test_data_from_other_address_dropped() {
    let server = server(SecurityConfig::default(), |cb| cb);
    let mut client = establish(&server, Credentials::new("alice", "pw"));
    let data = client.seal_data(b"spoofed").unwrap();

    let other: SocketAddr = "127.0.0.1:40002".parse().unwrap();
    assert!(matches!(
        server.handler.process(&data, other),
        Err(ProtocolError::SessionError(constants::ERR_UNKNOWN_SALT))
    ));
    assert!(server.inbox.lock().unwrap().is_empty());
}

#[test]
fn test_client_state_order_enforced() {
    let mut client = ClientSession::new(client_keys());
    assert!(matches!(
        client.auth(Credentials::default()),
        Err(ProtocolError::SessionError(constants::ERR_WRONG_STATE))
    ));
    assert!(client.seal_data(b"early").is_err());
    assert!(client.handle_htua(&[0, 0, 0, 5]).is_err());
}

#[test]
fn test_pinned_server_key_mismatch() {
    let server = server(SecurityConfig::default(), |cb| cb);
    let mut client =
        ClientSession::new(client_keys()).with_server_key(*KeyPair::generate().public());
    let olleh = server
        .handler
        .process(&client.hello().unwrap(), client_addr())
        .unwrap()
        .unwrap();
    assert!(matches!(
        client.handle_olleh(&olleh),
        Err(ProtocolError::SessionError(constants::ERR_SERVER_KEY_MISMATCH))
    ));
    assert_eq!(client.state(), SessionState::Unauthenticated);
}

#[test]
fn test_hello_callback_rewrites_info() {
    let server = server(SecurityConfig::default(), |cb| {
        cb.on_hello(|_, _, info| {
            info.need_pass = true;
            true
        })
    });
    let mut client = ClientSession::new(client_keys());
    let olleh = server
        .handler
        .process(&client.hello().unwrap(), client_addr())
        .unwrap()
        .unwrap();
    let info = client.handle_olleh(&olleh).unwrap();
    assert!(info.need_pass);
}

#[test]
fn test_rejected_key_gets_no_olleh() {
    let server = server(SecurityConfig::default(), |cb| cb.on_valid_key(|_| false));
    let client = ClientSession::new(client_keys());
    assert!(matches!(
        server.handler.process(&client.hello().unwrap(), client_addr()),
        Err(ProtocolError::Rejected(constants::ERR_KEY_REJECTED))
    ));
}

#[test]
fn test_no_key_derivation_fails_closed() {
    let handler = ServerHandler::from_config(
        &server_keys(),
        &SecurityConfig::default(),
        Callbacks::new(),
    );
    let client = ClientSession::new(client_keys());
    assert!(matches!(
        handler.process(&client.hello().unwrap(), client_addr()),
        Err(ProtocolError::SessionError(constants::ERR_NO_KEY_DERIVATION))
    ));
}

#[test]
fn test_server_ignores_client_bound_packets() {
    let server = server(SecurityConfig::default(), |cb| cb);
    let client = ClientSession::new(client_keys());
    let olleh = server
        .handler
        .process(&client.hello().unwrap(), client_addr())
        .unwrap()
        .unwrap();
    assert!(matches!(
        server.handler.process(&olleh, client_addr()),
        Err(ProtocolError::InvalidPacketType(2))
    ));
}
