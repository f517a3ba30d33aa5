//! Datagram receiver thread.
//!
//! One receiver owns the read side of one UDP socket and is the only producer
//! for its [`MessageBuffer`]. It waits for readability with the socket read
//! timeout, reads each datagram straight into a reserved slot and commits it,
//! which signals the pool.

use super::buffer::MessageBuffer;
use super::pool::WorkerPool;
use crate::config::MAX_DATAGRAM_SIZE;
use crate::error::{BufferError, ProtocolError, Result};
use crate::utils::metrics::global_metrics;
use std::io;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace};

#[cfg(windows)]
const WSAEMSGSIZE: i32 = 10040;

/// Outcome of one readiness wait
enum Readiness {
    Readable,
    Idle,
}

/// Handle to a running receiver thread
#[derive(Debug)]
pub struct Receiver {
    stop: Arc<AtomicBool>,
    pool: Arc<WorkerPool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Receiver {
    /// Spawn the receive loop for `socket`.
    ///
    /// # Errors
    /// `SocketFailure` if the poll timeout cannot be applied,
    /// `ThreadStartFailure` if the thread cannot be spawned.
    pub fn start(
        name: &str,
        socket: Arc<UdpSocket>,
        buffer: Arc<MessageBuffer>,
        pool: Arc<WorkerPool>,
        poll_timeout: Duration,
        debug_drops: bool,
    ) -> Result<Self> {
        socket
            .set_read_timeout(Some(poll_timeout))
            .map_err(ProtocolError::SocketFailure)?;

        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            let pool = Arc::clone(&pool);
            thread::Builder::new()
                .name(format!("{name}-receiver"))
                .spawn(move || receive_loop(&socket, &buffer, &pool, &stop, debug_drops))
                .map_err(ProtocolError::ThreadStartFailure)?
        };

        Ok(Self {
            stop,
            pool,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn is_running(&self) -> bool {
        super::lock(&self.handle)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop receiving, join the thread and stop the pool
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        let handle = super::lock(&self.handle).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Receiver thread panicked");
            }
        }
        self.pool.shutdown();
    }
}

fn receive_loop(
    socket: &UdpSocket,
    buffer: &MessageBuffer,
    pool: &WorkerPool,
    stop: &AtomicBool,
    debug_drops: bool,
) {
    let local = socket.local_addr().ok();
    info!(?local, "Receiver started");
    let mut scratch: Vec<u8> = Vec::new();

    let failure = loop {
        if stop.load(Ordering::Acquire) {
            break None;
        }

        match wait_readable(socket) {
            Ok(Readiness::Readable) => {}
            Ok(Readiness::Idle) => continue,
            Err(e) => break Some(e),
        }

        match buffer.reserve() {
            Ok(mut slot) => match socket.recv_from(slot.as_mut_slice()) {
                Ok((0, _)) => slot.rollback(),
                Ok((len, peer)) => {
                    if let Err(e) = slot.commit(len, peer) {
                        debug!(%peer, error = %e, "Failed to commit datagram");
                        continue;
                    }
                    global_metrics().datagram_received(len as u64);
                    trace!(%peer, len, "Datagram committed");
                }
                Err(e) if is_transient(&e) => slot.rollback(),
                Err(e) => break Some(e),
            },
            Err(BufferError::Exhausted) => {
                // Every slot is in a worker's hands; discard the datagram.
                if scratch.is_empty() {
                    scratch.resize(MAX_DATAGRAM_SIZE, 0);
                }
                match socket.recv_from(&mut scratch) {
                    Ok((len, peer)) => {
                        global_metrics().datagram_dropped();
                        if debug_drops {
                            debug!(%peer, len, "Buffer exhausted, datagram discarded");
                        }
                    }
                    Err(e) if is_transient(&e) => {}
                    Err(e) => break Some(e),
                }
            }
            Err(e) => {
                debug!(error = %e, "Unexpected buffer state");
            }
        }
    };

    if let Some(e) = failure {
        error!(error = %e, "Socket failure, stopping receiver");
        pool.shutdown();
    } else {
        info!(?local, "Receiver stopped");
    }
}

/// Wait up to the socket read timeout for a datagram to arrive.
fn wait_readable(socket: &UdpSocket) -> io::Result<Readiness> {
    let mut probe = [0u8; 1];
    match socket.peek_from(&mut probe) {
        Ok(_) => Ok(Readiness::Readable),
        Err(e) if is_transient(&e) => Ok(Readiness::Idle),
        #[cfg(windows)]
        Err(e) if e.raw_os_error() == Some(WSAEMSGSIZE) => Ok(Readiness::Readable),
        Err(e) => Err(e),
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Errors that concern one datagram (or an ICMP echo of one), not the socket
fn is_transient(e: &io::Error) -> bool {
    is_timeout(e)
        || matches!(
            e.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionRefused
                | io::ErrorKind::Interrupted
        )
}
