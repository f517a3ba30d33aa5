//! X25519 key pairs and session keys.
//!
//! The handshake derives the key for Olleh and Auth bodies from an ECDH
//! shared point. That point is never used directly: its SHA-256 digest is
//! rendered as 64 lower-case hex characters, and that text is the key handed
//! to the encryption engine.
//!
//! A client-proposed session key is an arbitrary string of 12 to 64 bytes.

use crate::config::{MAX_KEY_LEN, MIN_KEY_LEN};
use crate::error::{constants, ProtocolError, Result};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Long-lived X25519 key pair of one endpoint
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild a key pair from its 32 private-key bytes
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    /// Derive the textual key shared with `peer`
    pub fn shared_key(&self, peer: &PublicKey) -> SessionKey {
        let shared = self.secret.diffie_hellman(peer);
        let digest = Sha256::digest(shared.as_bytes());
        SessionKey(Zeroizing::new(hex::encode(digest)))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .finish_non_exhaustive()
    }
}

/// Symmetric key for encrypted bodies, zeroized on drop
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey(Zeroizing<String>);

impl SessionKey {
    /// Wrap a key string, enforcing the 12..=64 byte bounds
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = Zeroizing::new(key.into());
        if key.is_empty() {
            return Err(ProtocolError::SessionError(constants::ERR_EMPTY_SESSION_KEY));
        }
        if !(MIN_KEY_LEN..=MAX_KEY_LEN).contains(&key.len()) {
            return Err(ProtocolError::SessionError(
                constants::ERR_SESSION_KEY_LENGTH,
            ));
        }
        Ok(Self(key))
    }

    /// Generate a random 64-character key for a client to propose
    pub fn generate() -> Self {
        let mut raw = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut raw[..]);
        Self(Zeroizing::new(hex::encode(&raw[..])))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey(<{} bytes>)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_key_agrees() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let ab = alice.shared_key(bob.public());
        let ba = bob.shared_key(alice.public());
        assert_eq!(ab, ba);
        assert_eq!(ab.as_bytes().len(), 64);
        assert!(ab.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fixed_secret_is_deterministic() {
        let a = KeyPair::from_secret_bytes([7u8; 32]);
        let b = KeyPair::from_secret_bytes([7u8; 32]);
        assert_eq!(a.public(), b.public());
    }

    #[test]
    fn test_session_key_bounds() {
        assert!(SessionKey::new("").is_err());
        assert!(SessionKey::new("short").is_err());
        assert!(SessionKey::new("x".repeat(65)).is_err());
        assert!(SessionKey::new("twelve-bytes").is_ok());
        assert_eq!(SessionKey::generate().as_bytes().len(), 64);
    }

    #[test]
    fn test_debug_hides_key() {
        let key = SessionKey::new("super-secret-session").unwrap();
        assert!(!format!("{key:?}").contains("secret"));
    }
}
