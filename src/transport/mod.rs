//! # Transport Layer
//!
//! The concurrent receive pipeline that turns raw UDP datagrams into handler
//! invocations.
//!
//! ## Components
//! - **Notification**: counting signal between producer and workers
//! - **Buffer**: fixed-capacity ring of datagram slots with two-phase writes
//! - **Pool**: elastic set of worker threads between min and max
//! - **Receiver**: one thread per socket feeding the buffer
//! - **Channel**: socket + buffer + pool + receiver wired to a handler
//!
//! ## Concurrency
//! - OS threads only; every blocking call carries a timeout
//! - No lock is held across a socket call or a handler invocation
//! - The buffer never blocks its producer: the oldest ready message is
//!   evicted when the ring is full

use std::sync::{Mutex, MutexGuard};

pub mod buffer;
pub mod channel;
pub mod notify;
pub mod pool;
pub mod receiver;

pub use buffer::{Message, MessageBuffer};
pub use channel::{Channel, DatagramHandler};
pub use notify::Notification;
pub use pool::WorkerPool;

/// Lock bookkeeping state, recovering it if a holder panicked.
///
/// Guarded state here is plain counters and index lists that stay consistent
/// between statements.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
