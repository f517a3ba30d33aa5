//! # Channel
//!
//! One bound UDP socket with its receive pipeline: a [`MessageBuffer`], an
//! elastic [`WorkerPool`] and a [`Receiver`] thread. Every popped datagram is
//! handed to a [`DatagramHandler`] on a worker thread.
//!
//! ## Usage
//! ```rust,no_run
//! use secure_datagram::config::ProtocolConfig;
//! use secure_datagram::transport::{Channel, DatagramHandler, Message};
//! use std::net::UdpSocket;
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! impl DatagramHandler for Echo {
//!     fn handle(&self, message: &Message, socket: &UdpSocket) {
//!         let _ = socket.send_to(message.bytes(), message.peer());
//!     }
//! }
//!
//! let channel = Channel::start(&ProtocolConfig::default(), Arc::new(Echo))?;
//! println!("listening on {}", channel.local_addr());
//! channel.stop();
//! # Ok::<(), secure_datagram::error::ProtocolError>(())
//! ```

use super::buffer::{Message, MessageBuffer};
use super::notify::Notification;
use super::pool::{Job, WorkerPool};
use super::receiver::Receiver;
use crate::config::ProtocolConfig;
use crate::error::{ProtocolError, Result};
use crate::utils::metrics::global_metrics;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Per-datagram logic run on pool workers.
///
/// Implementations must not panic across datagrams and should return quickly;
/// the socket is shared with the receiver and other workers.
pub trait DatagramHandler: Send + Sync {
    fn handle(&self, message: &Message, socket: &UdpSocket);

    /// Called once when the owning channel stops, after its workers exit
    fn cleanup(&self) {}
}

/// A running socket + buffer + pool + receiver
pub struct Channel {
    handler: Arc<dyn DatagramHandler>,
    socket: Arc<UdpSocket>,
    buffer: Arc<MessageBuffer>,
    pool: Arc<WorkerPool>,
    receiver: Receiver,
    local_addr: SocketAddr,
    stopped: AtomicBool,
}

impl Channel {
    /// Bind `config.channel.address` and start receiving.
    ///
    /// # Errors
    /// `ConfigError` for an invalid configuration, `SocketFailure` if the
    /// socket cannot be bound, `ThreadStartFailure` if a thread cannot be
    /// spawned.
    #[instrument(skip_all, fields(address = %config.channel.address))]
    pub fn start(config: &ProtocolConfig, handler: Arc<dyn DatagramHandler>) -> Result<Self> {
        config.validate_strict()?;

        let socket =
            UdpSocket::bind(config.channel.address.as_str()).map_err(ProtocolError::SocketFailure)?;
        let local_addr = socket.local_addr().map_err(ProtocolError::SocketFailure)?;
        let socket = Arc::new(socket);
        let name = format!("dgram-{}", local_addr.port());

        let notify = Arc::new(Notification::new());
        let buffer = Arc::new(MessageBuffer::new(
            config.channel.buffer_capacity,
            config.channel.slot_size,
            Arc::clone(&notify),
        ));

        let job: Job = {
            let handler = Arc::clone(&handler);
            let buffer = Arc::clone(&buffer);
            let socket = Arc::clone(&socket);
            Arc::new(move || {
                if let Ok(message) = buffer.pop() {
                    handler.handle(&message, &socket);
                }
            })
        };

        let pool = Arc::new(WorkerPool::start(
            name.as_str(),
            config.pool.clone(),
            notify,
            job,
        )?);

        let receiver = match Receiver::start(
            &name,
            Arc::clone(&socket),
            Arc::clone(&buffer),
            Arc::clone(&pool),
            config.channel.poll_timeout,
            config.channel.debug_drops,
        ) {
            Ok(receiver) => receiver,
            Err(e) => {
                pool.shutdown();
                return Err(e);
            }
        };

        info!(%local_addr, "Channel started");
        Ok(Self {
            handler,
            socket,
            buffer,
            pool,
            receiver,
            local_addr,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared socket, for handlers or callers that send on their own
    pub fn socket(&self) -> &Arc<UdpSocket> {
        &self.socket
    }

    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Datagrams waiting for a worker
    pub fn backlog(&self) -> usize {
        self.buffer.ready_len()
    }

    /// Send one datagram from this channel's socket
    pub fn send_to(&self, bytes: &[u8], peer: SocketAddr) -> Result<usize> {
        let sent = self
            .socket
            .send_to(bytes, peer)
            .map_err(ProtocolError::SocketFailure)?;
        global_metrics().datagram_sent(sent as u64);
        debug!(%peer, sent, "Datagram sent");
        Ok(sent)
    }

    /// Stop the receiver and the pool; later calls do nothing
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.receiver.stop();
        self.handler.cleanup();
        info!(local_addr = %self.local_addr, "Channel stopped");
        global_metrics().log_metrics();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("local_addr", &self.local_addr)
            .field("pool", &self.pool)
            .field("backlog", &self.backlog())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Echo;

    impl DatagramHandler for Echo {
        fn handle(&self, message: &Message, socket: &UdpSocket) {
            let _ = socket.send_to(message.bytes(), message.peer());
        }
    }

    struct Recorder(Mutex<Vec<Vec<u8>>>, AtomicBool);

    impl DatagramHandler for Recorder {
        fn handle(&self, message: &Message, _socket: &UdpSocket) {
            self.0.lock().unwrap().push(message.bytes().to_vec());
        }

        fn cleanup(&self) {
            self.1.store(true, Ordering::SeqCst);
        }
    }

    fn config() -> ProtocolConfig {
        ProtocolConfig::default_with_overrides(|c| {
            c.channel.poll_timeout = Duration::from_millis(50);
            c.channel.slot_size = 2048;
            c.pool.wait_timeout = Duration::from_millis(20);
        })
    }

    #[test]
    fn test_echo_roundtrip() {
        let channel = Channel::start(&config(), Arc::new(Echo)).unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        client.send_to(b"marco", channel.local_addr()).unwrap();
        let mut buf = [0u8; 64];
        let (len, from) = client.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"marco");
        assert_eq!(from, channel.local_addr());
        channel.stop();
        assert!(channel.is_stopped());
    }

    #[test]
    fn test_messages_in_order_single_worker() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new()), AtomicBool::new(false)));
        let mut cfg = config();
        cfg.pool.max_workers = 1;
        let channel = Channel::start(&cfg, recorder.clone()).unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        for i in 0..5u8 {
            client.send_to(&[i], channel.local_addr()).unwrap();
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while recorder.0.lock().unwrap().len() < 5 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(seen, (0..5u8).map(|i| vec![i]).collect::<Vec<_>>());
        assert!(!recorder.1.load(Ordering::SeqCst));
        channel.stop();
        assert!(recorder.1.load(Ordering::SeqCst));
    }

    #[test]
    fn test_bind_failure_is_socket_failure() {
        let holder = UdpSocket::bind("127.0.0.1:0").unwrap();
        let taken = holder.local_addr().unwrap().to_string();
        let cfg = ProtocolConfig::default_with_overrides(|c| c.channel.address = taken);
        assert!(matches!(
            Channel::start(&cfg, Arc::new(Echo)),
            Err(ProtocolError::SocketFailure(_))
        ));
    }
}
