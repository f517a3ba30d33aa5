//! # Utility Modules
//!
//! Supporting utilities for cryptography, key material, replay protection,
//! logging and metrics.
//!
//! ## Components
//! - **Crypto**: the encryption engine sealing every encrypted packet body
//! - **Keys**: X25519 key pairs and textual session keys
//! - **Replay Window**: bounded per-session set of accepted salts
//! - **Logging**: `tracing-subscriber` setup from configuration
//! - **Metrics**: thread-safe observability counters
//!
//! ## Security
//! - Salts from the OS CSPRNG (getrandom)
//! - Constant-time tag comparison (subtle)
//! - Memory zeroing for key material (zeroize)

pub mod crypto;
pub mod keys;
pub mod logging;
pub mod metrics;
pub mod replay_window;

pub use keys::{KeyPair, SessionKey};
pub use replay_window::SaltWindow;
