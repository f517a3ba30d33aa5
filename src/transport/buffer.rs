//! # Message Buffer
//!
//! Fixed-capacity ring of preallocated datagram slots shared by one receiver
//! thread (the only producer) and the workers of one pool.
//!
//! Writes are two-phase so the payload copy happens outside the lock:
//! [`MessageBuffer::reserve`] hands out a slot's storage, the caller fills it,
//! then [`Reservation::commit`] links it into the ready list and signals the
//! notification. [`Reservation::rollback`] (or dropping the reservation)
//! returns the slot unused.
//!
//! When no slot is free, `reserve` evicts the oldest ready message instead of
//! blocking. Ready messages are popped in commit order.
//!
//! ## Usage
//! ```rust
//! use secure_datagram::transport::{MessageBuffer, Notification};
//! use std::sync::Arc;
//!
//! let buffer = MessageBuffer::new(4, 1500, Arc::new(Notification::new()));
//! let peer = "127.0.0.1:9000".parse().unwrap();
//!
//! let mut slot = buffer.reserve().unwrap();
//! slot.as_mut_slice()[..5].copy_from_slice(b"hello");
//! slot.commit(5, peer).unwrap();
//!
//! let message = buffer.pop().unwrap();
//! assert_eq!(message.bytes(), b"hello");
//! ```

use super::lock;
use super::notify::Notification;
use crate::error::BufferError;
use crate::utils::metrics::global_metrics;
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr};
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use tracing::trace;

/// A received datagram: slot storage, valid length and sender address
#[derive(Debug, Clone)]
pub struct Message {
    data: Vec<u8>,
    len: usize,
    peer: SocketAddr,
}

impl Message {
    /// Standalone message holding a copy of `bytes`
    pub fn new(bytes: &[u8], peer: SocketAddr) -> Self {
        Self {
            data: bytes.to_vec(),
            len: bytes.len(),
            peer,
        }
    }

    fn empty(slot_size: usize) -> Self {
        Self {
            data: vec![0u8; slot_size],
            len: 0,
            peer: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        }
    }

    /// Storage-less stand-in, swapped in while a slot is being released
    fn detached() -> Self {
        Self::empty(0)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug)]
struct Ring {
    /// Slot storage; `None` while lent to a reservation or a popped message
    slots: Vec<Option<Message>>,
    free: VecDeque<usize>,
    ready: VecDeque<usize>,
}

/// Bounded, lossy, FIFO ring of datagram slots
#[derive(Debug)]
pub struct MessageBuffer {
    ring: Mutex<Ring>,
    notify: Arc<Notification>,
    capacity: usize,
    slot_size: usize,
}

impl MessageBuffer {
    /// Preallocate `capacity` slots of `slot_size` bytes each
    pub fn new(capacity: usize, slot_size: usize, notify: Arc<Notification>) -> Self {
        let slots = (0..capacity)
            .map(|_| Some(Message::empty(slot_size)))
            .collect();
        Self {
            ring: Mutex::new(Ring {
                slots,
                free: (0..capacity).collect(),
                ready: VecDeque::with_capacity(capacity),
            }),
            notify,
            capacity,
            slot_size,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Messages committed but not yet popped
    pub fn ready_len(&self) -> usize {
        lock(&self.ring).ready.len()
    }

    pub fn notification(&self) -> &Arc<Notification> {
        &self.notify
    }

    /// Take a slot to write into.
    ///
    /// Prefers a free slot; otherwise evicts the oldest ready message.
    ///
    /// # Errors
    /// `Exhausted` if every slot is lent out to reservations or popped
    /// messages still being handled.
    pub fn reserve(&self) -> Result<Reservation<'_>, BufferError> {
        let mut ring = lock(&self.ring);

        let (index, evicted) = match ring.free.pop_front() {
            Some(index) => (index, false),
            None => {
                let index = ring.ready.pop_front().ok_or(BufferError::Exhausted)?;
                global_metrics().datagram_evicted();
                trace!(slot = index, "Evicted oldest ready message");
                (index, true)
            }
        };

        let message = ring.slots[index].take();
        drop(ring);

        // The evicted message's signal no longer stands for any work
        if evicted {
            self.notify.try_consume();
        }

        match message {
            Some(message) => Ok(Reservation {
                buffer: self,
                index,
                message: Some(message),
            }),
            // Slot indices are only queued while their storage is parked.
            None => Err(BufferError::Exhausted),
        }
    }

    /// One-phase write: copy `bytes` into a slot and commit it
    pub fn push(&self, bytes: &[u8], peer: SocketAddr) -> Result<(), BufferError> {
        if bytes.len() > self.slot_size {
            return Err(BufferError::Oversized(bytes.len()));
        }
        let mut slot = self.reserve()?;
        slot.as_mut_slice()[..bytes.len()].copy_from_slice(bytes);
        slot.commit(bytes.len(), peer)
    }

    /// Remove the oldest ready message.
    ///
    /// The slot returns to the free list when the [`Popped`] guard drops.
    pub fn pop(&self) -> Result<Popped<'_>, BufferError> {
        let mut ring = lock(&self.ring);
        let index = ring.ready.pop_front().ok_or(BufferError::Empty)?;
        let message = ring.slots[index].take().ok_or(BufferError::Empty)?;
        Ok(Popped {
            buffer: self,
            index,
            message,
        })
    }

    fn park(&self, index: usize, message: Message, ready: bool) {
        let mut ring = lock(&self.ring);
        ring.slots[index] = Some(message);
        if ready {
            ring.ready.push_back(index);
        } else {
            ring.free.push_back(index);
        }
    }
}

/// A slot lent out for writing
#[derive(Debug)]
pub struct Reservation<'a> {
    buffer: &'a MessageBuffer,
    index: usize,
    message: Option<Message>,
}

impl Reservation<'_> {
    /// Writable storage of the full slot size
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self.message.as_mut() {
            Some(message) => &mut message.data[..],
            None => &mut [],
        }
    }

    /// Publish the first `len` bytes as a ready message from `peer`
    pub fn commit(mut self, len: usize, peer: SocketAddr) -> Result<(), BufferError> {
        let Some(mut message) = self.message.take() else {
            return Err(BufferError::Exhausted);
        };
        if len > message.data.len() {
            self.buffer.park(self.index, message, false);
            return Err(BufferError::Oversized(len));
        }

        message.len = len;
        message.peer = peer;
        self.buffer.park(self.index, message, true);
        self.buffer.notify.notify_one();
        Ok(())
    }

    /// Return the slot unused, without signalling
    pub fn rollback(self) {}
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            self.buffer.park(self.index, message, false);
        }
    }
}

/// A message removed from the ring; its slot is freed on drop
#[derive(Debug)]
pub struct Popped<'a> {
    buffer: &'a MessageBuffer,
    index: usize,
    message: Message,
}

impl Deref for Popped<'_> {
    type Target = Message;

    fn deref(&self) -> &Message {
        &self.message
    }
}

impl Drop for Popped<'_> {
    fn drop(&mut self) {
        let mut message = std::mem::replace(&mut self.message, Message::detached());
        message.len = 0;
        self.buffer.park(self.index, message, false);
    }
}
