//! # Secure Datagram
//!
//! A secure request/response protocol over UDP.
//!
//! ## Layers
//! - [`core`]: length-prefixed wire encoding and the five packet kinds
//! - [`utils`]: encryption engine, X25519 keys, replay window, logging, metrics
//! - [`transport`]: message buffer, elastic worker pool, receiver, channel
//! - [`protocol`]: handshake handlers, callbacks, in-memory session store
//!
//! ## Handshake
//! ```text
//! Hello -> Olleh -> Auth -> Htua -> Data <-> Data
//! ```
//! Hello carries the client's public key in the clear. Olleh and Auth are
//! sealed under a key derived from X25519. Htua and Data are sealed under the
//! session key the client proposed in Auth. Every sealed message uses the
//! salt last received from the other side and carries a fresh one.
//!
//! ## Quick Start
//! ```rust,no_run
//! use secure_datagram::config::ProtocolConfig;
//! use secure_datagram::protocol::{Callbacks, MemorySessionStore, ServerHandler};
//! use secure_datagram::transport::Channel;
//! use secure_datagram::utils::KeyPair;
//! use std::sync::Arc;
//!
//! let config = ProtocolConfig::default();
//! let keys = Arc::new(KeyPair::generate());
//! let store = Arc::new(MemorySessionStore::new(&config.security));
//! let callbacks = store
//!     .install(Callbacks::with_key_pair(Arc::clone(&keys)))
//!     .on_data(|peer, payload| println!("{peer}: {} bytes", payload.len()));
//!
//! let handler = ServerHandler::from_config(&keys, &config.security, callbacks);
//! let channel = Channel::start(&config, Arc::new(handler))?;
//! println!("serving on {}", channel.local_addr());
//! # Ok::<(), secure_datagram::error::ProtocolError>(())
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use error::{ProtocolError, Result};
