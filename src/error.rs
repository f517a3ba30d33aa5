//! # Error Types
//!
//! Error handling for the secure datagram protocol.
//!
//! Two layers of errors exist:
//! - [`ProtocolError`] is returned by every public operation (channel startup,
//!   encoding, decoding, handshake steps).
//! - [`CryptoError`] carries the precise reason the encryption engine refused
//!   to run or rejected a sealed segment. It converts into
//!   [`ProtocolError::Crypto`].
//!
//! ## Error Categories
//! - **Socket errors**: bind/recv/send failures, fatal for a channel at startup
//! - **Codec errors**: invalid type tag, short or malformed encodings
//! - **Cryptographic errors**: key/size validation, tag mismatch
//! - **Session errors**: unknown salt, missing session key, wrong state
//! - **Thread errors**: worker or receiver thread could not be spawned
//!
//! Errors raised while processing a single received datagram never leave the
//! worker that handled it: the datagram is dropped and the reason is logged at
//! debug level.
//!
//! ## Example Usage
//! ```rust
//! use secure_datagram::error::{ProtocolError, Result};
//! use secure_datagram::core::packet::peek_type;
//!
//! fn kind(bytes: &[u8]) -> Result<u32> {
//!     Ok(peek_type(bytes)? as u32)
//! }
//!
//! assert!(matches!(kind(&[0, 0, 0, 3]), Err(ProtocolError::InvalidPacketType(3))));
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Codec errors
    pub const ERR_SHORT_BUFFER: &str = "Buffer too short for field";
    pub const ERR_LENGTH_OVERFLOW: &str = "Declared length exceeds remaining bytes";
    pub const ERR_NONZERO_PADDING: &str = "Non-zero padding after opaque field";
    pub const ERR_INVALID_UTF8: &str = "String field is not valid UTF-8";
    pub const ERR_TRAILING_BYTES: &str = "Unexpected trailing bytes after last field";
    pub const ERR_MISSING_FRAME: &str = "Encrypted body shorter than header and footer";
    pub const ERR_BAD_SALT: &str = "Salt field must be exactly 8 bytes";
    pub const ERR_BAD_PUBLIC_KEY: &str = "Public key field must be exactly 32 bytes";
    pub const ERR_OVERSIZED_PAYLOAD: &str = "Payload exceeds maximum size";

    /// Session errors
    pub const ERR_UNKNOWN_SALT: &str = "No session registered for salt";
    pub const ERR_EMPTY_SESSION_KEY: &str = "Session key is empty";
    pub const ERR_SESSION_KEY_LENGTH: &str = "Session key length out of range";
    pub const ERR_NO_KEY_DERIVATION: &str = "No key derivation registered";
    pub const ERR_NO_SESSION_LOOKUP: &str = "No session lookup registered";
    pub const ERR_WRONG_STATE: &str = "Operation not allowed in current session state";
    pub const ERR_SERVER_KEY_MISMATCH: &str = "Server public key does not match the pre-shared key";
    pub const ERR_REPLAYED_SALT: &str = "Salt already accepted for this session";
    pub const ERR_PEER_MISMATCH: &str = "Salt belongs to a different peer";

    /// Handshake rejections
    pub const ERR_KEY_REJECTED: &str = "Public key rejected";
    pub const ERR_HELLO_REJECTED: &str = "Hello rejected";
    pub const ERR_CREDENTIALS_REJECTED: &str = "Credentials rejected";
    pub const ERR_SESSION_REJECTED: &str = "Session registration rejected";
}

/// Reasons the encryption engine refuses input or rejects a sealed segment.
///
/// Validation variants are produced before any cryptographic work runs.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption key is empty")]
    EmptyKey,

    #[error("Encryption key length {0} outside 12..=64 bytes")]
    KeyLength(usize),

    #[error("Salt must be 8 bytes, got {0}")]
    SaltLength(usize),

    #[error("Data too large: {0} bytes")]
    OversizedData(usize),

    #[error("Ciphertext too short: {0} bytes")]
    CiphertextTooShort(usize),

    #[error("Header must be 8 bytes, got {0}")]
    HeaderLength(usize),

    #[error("Footer must be 8 bytes, got {0}")]
    FooterLength(usize),

    #[error("Authentication tag mismatch")]
    TagMismatch,

    #[error("Key derivation failed")]
    KeyDerivation,

    #[error("Random source unavailable")]
    RandomSource,
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Socket failure: {0}")]
    SocketFailure(#[source] io::Error),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Invalid packet type: {0}")]
    InvalidPacketType(u32),

    #[error("Codec error: {0}")]
    CodecError(&'static str),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Session error: {0}")]
    SessionError(&'static str),

    #[error("Handshake rejected: {0}")]
    Rejected(&'static str),

    #[error("Failed to start thread: {0}")]
    ThreadStartFailure(#[source] io::Error),

    #[error("Message buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Outcomes of buffer operations that produced no slot.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[error("No ready message")]
    Empty,

    #[error("Every slot is currently lent out")]
    Exhausted,

    #[error("Message of {0} bytes does not fit in a slot")]
    Oversized(usize),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
