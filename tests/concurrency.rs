//! Concurrent producers, elastic workers and many simultaneous handshakes

#![allow(clippy::unwrap_used, clippy::expect_used)]

use secure_datagram::config::{PoolConfig, SecurityConfig};
use secure_datagram::core::packet::Credentials;
use secure_datagram::protocol::{
    Callbacks, ClientSession, MemorySessionStore, ServerHandler, SessionState,
};
use secure_datagram::transport::pool::Job;
use secure_datagram::transport::{MessageBuffer, Notification, WorkerPool};
use secure_datagram::utils::KeyPair;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

fn pool_config(min: usize, max: usize) -> PoolConfig {
    PoolConfig {
        min_workers: min,
        max_workers: max,
        wait_timeout: Duration::from_millis(20),
        max_idle_attempts: 5,
        backlog_threshold: 2,
        shutdown_timeout: Duration::from_secs(5),
    }
}

#[test]
fn concurrent_producers_all_messages_handled() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 500;

    let notify = Arc::new(Notification::new());
    // Large enough that nothing is evicted
    let buffer = Arc::new(MessageBuffer::new(
        PRODUCERS * PER_PRODUCER,
        512,
        Arc::clone(&notify),
    ));
    let handled = Arc::new(AtomicUsize::new(0));

    let job: Job = {
        let buffer = Arc::clone(&buffer);
        let handled = Arc::clone(&handled);
        Arc::new(move || {
            if let Ok(message) = buffer.pop() {
                assert_eq!(message.len(), 8);
                handled.fetch_add(1, Ordering::SeqCst);
            }
        })
    };
    let pool = WorkerPool::start("concurrent", pool_config(1, 8), notify, job).unwrap();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let peer: SocketAddr = format!("127.0.0.1:{}", 6000 + p).parse().unwrap();
                for i in 0..PER_PRODUCER {
                    buffer.push(&(i as u64).to_be_bytes(), peer).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert!(wait_until(Duration::from_secs(10), || {
        handled.load(Ordering::SeqCst) == PRODUCERS * PER_PRODUCER
    }));
    assert!(pool.shutdown());
    assert_eq!(pool.worker_count(), 0);
}

#[test]
fn pool_grows_under_backlog_and_shrinks_when_idle() {
    let notify = Arc::new(Notification::new());
    let job: Job = Arc::new(|| thread::sleep(Duration::from_millis(20)));
    let pool = WorkerPool::start("elastic", pool_config(1, 4), Arc::clone(&notify), job).unwrap();
    assert_eq!(pool.worker_count(), 1);

    for _ in 0..64 {
        notify.notify_one();
    }
    assert!(wait_until(Duration::from_secs(5), || pool.worker_count() > 1));
    assert!(pool.worker_count() <= 4);

    assert!(wait_until(Duration::from_secs(10), || pool.worker_count() == 1));
    assert!(pool.shutdown());
}

#[test]
fn many_clients_handshake_in_parallel() {
    const CLIENTS: u16 = 16;

    let keys = Arc::new(KeyPair::generate());
    let security = SecurityConfig::default();
    let store = Arc::new(MemorySessionStore::new(&security));
    let delivered = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&delivered);
    let callbacks = store
        .install(Callbacks::with_key_pair(Arc::clone(&keys)))
        .on_data(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    let server = Arc::new(ServerHandler::from_config(&keys, &security, callbacks));

    let clients: Vec<_> = (0..CLIENTS)
        .map(|n| {
            let server = Arc::clone(&server);
            let server_key = *keys.public();
            thread::spawn(move || {
                let addr: SocketAddr = format!("127.0.0.1:{}", 41000 + n).parse().unwrap();
                let mut client = ClientSession::new(KeyPair::generate()).with_server_key(server_key);

                let olleh = server.process(&client.hello().unwrap(), addr).unwrap().unwrap();
                client.handle_olleh(&olleh).unwrap();
                let creds = Credentials::new(format!("user{n}"), "pw");
                let htua = server.process(&client.auth(creds).unwrap(), addr).unwrap().unwrap();
                client.handle_htua(&htua).unwrap();
                assert_eq!(client.state(), SessionState::Authenticated);

                for i in 0..5u8 {
                    let data = client.seal_data(&[i]).unwrap();
                    assert!(server.process(&data, addr).unwrap().is_none());
                }
            })
        })
        .collect();
    for client in clients {
        client.join().unwrap();
    }

    assert_eq!(store.len(), CLIENTS as usize);
    assert_eq!(delivered.load(Ordering::SeqCst), CLIENTS as usize * 5);
}
