//! # Protocol Layer
//!
//! The handshake state machine and session handling run inside channel
//! workers.
//!
//! ## Components
//! - **Callbacks**: policy and session-storage hooks
//! - **Handshake**: [`ServerHandler`], [`ClientSession`], [`ClientHandler`]
//! - **Session Store**: in-memory reference implementation of the session
//!   callbacks with replay rejection

pub mod callbacks;
pub mod handshake;
pub mod session_store;

pub use callbacks::{Callbacks, NewSession};
pub use handshake::{ClientHandler, ClientSession, ServerHandler, SessionState};
pub use session_store::MemorySessionStore;

#[cfg(test)]
mod tests;
