//! Replay window for rolling salts
//!
//! Every Data packet carries a fresh salt chosen by its sender. A packet
//! captured and re-sent verbatim carries the same salt again, so remembering
//! the most recently accepted salts of a session is enough to reject it.
//!
//! The window is bounded: once full, the oldest salt is forgotten with O(1)
//! FIFO eviction.

use crate::config::SALT_LEN;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

/// Bounded set of recently accepted salts for one session
#[derive(Debug, Clone)]
pub struct SaltWindow {
    seen: HashSet<[u8; SALT_LEN]>,
    /// Insertion order for FIFO eviction
    order: VecDeque<[u8; SALT_LEN]>,
    capacity: usize,
}

impl SaltWindow {
    /// Create a window remembering up to `capacity` salts.
    ///
    /// A capacity of 0 disables replay rejection.
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `salt` and report whether it is fresh.
    ///
    /// Returns false if the salt is still inside the window (a replay).
    pub fn accept(&mut self, salt: &[u8; SALT_LEN]) -> bool {
        if self.capacity == 0 {
            return true;
        }

        if self.seen.contains(salt) {
            warn!(salt = %hex::encode(salt), "Replayed salt rejected");
            return false;
        }

        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
                debug!("Salt window full, forgot oldest salt");
            }
        }

        self.seen.insert(*salt);
        self.order.push_back(*salt);
        true
    }

    pub fn contains(&self, salt: &[u8; SALT_LEN]) -> bool {
        self.seen.contains(salt)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for SaltWindow {
    fn default() -> Self {
        Self::new(64)
    }
}
