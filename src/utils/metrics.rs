//! Observability and Metrics
//!
//! Process-wide counters for the receive pipeline and the handshake.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Global metrics collector for protocol operations
#[derive(Debug)]
pub struct Metrics {
    /// Datagrams committed to a message buffer
    pub datagrams_received: AtomicU64,
    /// Bytes committed to a message buffer
    pub bytes_received: AtomicU64,
    /// Datagrams discarded by a handler (codec, crypto or session failure)
    pub datagrams_dropped: AtomicU64,
    /// Ready messages overwritten because the buffer was full
    pub datagrams_evicted: AtomicU64,
    /// Datagrams sent by handlers or channels
    pub datagrams_sent: AtomicU64,
    /// Bytes sent by handlers or channels
    pub bytes_sent: AtomicU64,
    /// Hello packets answered with an Olleh
    pub hellos_answered: AtomicU64,
    /// Auth packets answered with a Htua
    pub sessions_established: AtomicU64,
    /// Handshake packets rejected by a callback
    pub handshakes_rejected: AtomicU64,
    /// Bodies whose tag or parameters failed verification
    pub crypto_failures: AtomicU64,
    /// Data packets delivered to the data-arrival callback
    pub data_delivered: AtomicU64,
    /// Data packets rejected by the replay window
    pub replays_rejected: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            datagrams_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            datagrams_dropped: AtomicU64::new(0),
            datagrams_evicted: AtomicU64::new(0),
            datagrams_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            hellos_answered: AtomicU64::new(0),
            sessions_established: AtomicU64::new(0),
            handshakes_rejected: AtomicU64::new(0),
            crypto_failures: AtomicU64::new(0),
            data_delivered: AtomicU64::new(0),
            replays_rejected: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a datagram committed to a buffer
    pub fn datagram_received(&self, byte_count: u64) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn datagram_dropped(&self) {
        self.datagrams_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn datagram_evicted(&self) {
        self.datagrams_evicted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a datagram sent
    pub fn datagram_sent(&self, byte_count: u64) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn hello_answered(&self) {
        self.hellos_answered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_established(&self) {
        self.sessions_established.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_rejected(&self) {
        self.handshakes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn crypto_failure(&self) {
        self.crypto_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn data_delivered(&self) {
        self.data_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn replay_rejected(&self) {
        self.replays_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            datagrams_dropped: self.datagrams_dropped.load(Ordering::Relaxed),
            datagrams_evicted: self.datagrams_evicted.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            hellos_answered: self.hellos_answered.load(Ordering::Relaxed),
            sessions_established: self.sessions_established.load(Ordering::Relaxed),
            handshakes_rejected: self.handshakes_rejected.load(Ordering::Relaxed),
            crypto_failures: self.crypto_failures.load(Ordering::Relaxed),
            data_delivered: self.data_delivered.load(Ordering::Relaxed),
            replays_rejected: self.replays_rejected.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            datagrams_received = snapshot.datagrams_received,
            bytes_received = snapshot.bytes_received,
            datagrams_dropped = snapshot.datagrams_dropped,
            datagrams_evicted = snapshot.datagrams_evicted,
            datagrams_sent = snapshot.datagrams_sent,
            bytes_sent = snapshot.bytes_sent,
            hellos_answered = snapshot.hellos_answered,
            sessions_established = snapshot.sessions_established,
            handshakes_rejected = snapshot.handshakes_rejected,
            crypto_failures = snapshot.crypto_failures,
            data_delivered = snapshot.data_delivered,
            replays_rejected = snapshot.replays_rejected,
            uptime_seconds = snapshot.uptime_seconds,
            "Protocol metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub datagrams_received: u64,
    pub bytes_received: u64,
    pub datagrams_dropped: u64,
    pub datagrams_evicted: u64,
    pub datagrams_sent: u64,
    pub bytes_sent: u64,
    pub hellos_answered: u64,
    pub sessions_established: u64,
    pub handshakes_rejected: u64,
    pub crypto_failures: u64,
    pub data_delivered: u64,
    pub replays_rejected: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}
