//! # Encryption Engine
//!
//! Authenticated encryption of one encrypted packet body.
//!
//! A sealed body is three parts: an 8-byte header, the ciphertext and an
//! 8-byte MAC footer.
//!
//! ```text
//! header     = salt
//! padded     = random(4) || plaintext
//! footer     = HMAC-SHA256(mac_key, header || padded)[..8]
//! ciphertext = XChaCha20(enc_key, nonce = header || footer || 0u64)(padded)
//! ```
//!
//! `enc_key` and `mac_key` are expanded from the caller's key (12 to 64 bytes)
//! with HKDF-SHA256. The footer doubles as a synthetic IV: a salt reused under
//! the same key only yields a repeated keystream when the random prefix and
//! the plaintext also repeat.
//!
//! Every length check runs before any key material is derived, so malformed
//! input never reaches the cipher.

use crate::config::{
    FOOTER_LEN, HEADER_LEN, MAX_KEY_LEN, MAX_PLAINTEXT_SIZE, MIN_KEY_LEN, PAD_LEN, SALT_LEN,
};
use crate::error::CryptoError;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::XChaCha20;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

type HmacSha256 = Hmac<Sha256>;

const ENC_KEY_INFO: &[u8] = b"secure-datagram/v1/enc";
const MAC_KEY_INFO: &[u8] = b"secure-datagram/v1/mac";

/// One sealed body, as laid out on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub header: [u8; HEADER_LEN],
    pub ciphertext: Vec<u8>,
    pub footer: [u8; FOOTER_LEN],
}

impl Sealed {
    /// Total number of bytes this body occupies on the wire
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.ciphertext.len() + FOOTER_LEN
    }
}

/// Subkeys derived from one session or shared key
pub struct Crypto {
    enc_key: [u8; 32],
    mac_key: [u8; 32],
}

impl Drop for Crypto {
    fn drop(&mut self) {
        self.enc_key.zeroize();
        self.mac_key.zeroize();
    }
}

impl Crypto {
    /// Validate `key` and derive the cipher and MAC subkeys from it
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        validate_key(key)?;

        let hkdf = Hkdf::<Sha256>::new(None, key);
        let mut enc_key = [0u8; 32];
        let mut mac_key = [0u8; 32];
        hkdf.expand(ENC_KEY_INFO, &mut enc_key)
            .map_err(|_| CryptoError::KeyDerivation)?;
        hkdf.expand(MAC_KEY_INFO, &mut mac_key)
            .map_err(|_| CryptoError::KeyDerivation)?;

        Ok(Self { enc_key, mac_key })
    }

    /// Seal `plaintext` under `salt`
    pub fn seal(&self, salt: &[u8], plaintext: &[u8]) -> Result<Sealed, CryptoError> {
        let header = salt_header(salt)?;
        if plaintext.len() > MAX_PLAINTEXT_SIZE {
            return Err(CryptoError::OversizedData(plaintext.len()));
        }

        let mut pad = [0u8; PAD_LEN];
        getrandom::fill(&mut pad).map_err(|_| CryptoError::RandomSource)?;
        let mut ciphertext = Vec::with_capacity(PAD_LEN + plaintext.len());
        ciphertext.extend_from_slice(&pad);
        ciphertext.extend_from_slice(plaintext);

        let footer = self.tag(&header, &ciphertext)?;
        self.keystream(&header, &footer).apply_keystream(&mut ciphertext);

        Ok(Sealed {
            header,
            ciphertext,
            footer,
        })
    }

    /// Verify and decrypt one sealed body
    pub fn open(
        &self,
        header: &[u8],
        ciphertext: &[u8],
        footer: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let header: [u8; HEADER_LEN] = header
            .try_into()
            .map_err(|_| CryptoError::HeaderLength(header.len()))?;
        let footer: [u8; FOOTER_LEN] = footer
            .try_into()
            .map_err(|_| CryptoError::FooterLength(footer.len()))?;
        if ciphertext.len() < PAD_LEN {
            return Err(CryptoError::CiphertextTooShort(ciphertext.len()));
        }
        if ciphertext.len() > PAD_LEN + MAX_PLAINTEXT_SIZE {
            return Err(CryptoError::OversizedData(ciphertext.len() - PAD_LEN));
        }

        let mut padded = Zeroizing::new(ciphertext.to_vec());
        self.keystream(&header, &footer).apply_keystream(&mut padded);

        let expected = self.tag(&header, &padded)?;
        if !bool::from(expected[..].ct_eq(&footer[..])) {
            return Err(CryptoError::TagMismatch);
        }
        Ok(padded[PAD_LEN..].to_vec())
    }

    fn keystream(&self, header: &[u8; HEADER_LEN], footer: &[u8; FOOTER_LEN]) -> XChaCha20 {
        let mut nonce = [0u8; 24];
        nonce[..HEADER_LEN].copy_from_slice(header);
        nonce[HEADER_LEN..HEADER_LEN + FOOTER_LEN].copy_from_slice(footer);
        XChaCha20::new(&self.enc_key.into(), &nonce.into())
    }

    fn tag(
        &self,
        header: &[u8; HEADER_LEN],
        padded: &[u8],
    ) -> Result<[u8; FOOTER_LEN], CryptoError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.mac_key)
            .map_err(|_| CryptoError::KeyDerivation)?;
        mac.update(header);
        mac.update(padded);
        let full = mac.finalize().into_bytes();

        let mut footer = [0u8; FOOTER_LEN];
        footer.copy_from_slice(&full[..FOOTER_LEN]);
        Ok(footer)
    }
}

/// Encrypt `plaintext` under `key`, seeded by `salt`.
///
/// # Errors
/// Returns the matching [`CryptoError`] validation variant for an empty or
/// out-of-range key, a salt that is not 8 bytes, or a plaintext larger than
/// 65200 bytes.
pub fn encrypt(salt: &[u8], key: &[u8], plaintext: &[u8]) -> Result<Sealed, CryptoError> {
    // No key derivation for input that fails validation.
    salt_header(salt)?;
    validate_key(key)?;
    if plaintext.len() > MAX_PLAINTEXT_SIZE {
        return Err(CryptoError::OversizedData(plaintext.len()));
    }
    Crypto::new(key)?.seal(salt, plaintext)
}

/// Decrypt a sealed body.
///
/// # Errors
/// Returns [`CryptoError::TagMismatch`] when the footer does not authenticate
/// the header and recovered plaintext under `key`, or a validation variant for
/// malformed lengths.
pub fn decrypt(
    key: &[u8],
    header: &[u8],
    ciphertext: &[u8],
    footer: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    validate_key(key)?;
    if header.len() != HEADER_LEN {
        return Err(CryptoError::HeaderLength(header.len()));
    }
    if footer.len() != FOOTER_LEN {
        return Err(CryptoError::FooterLength(footer.len()));
    }
    if ciphertext.len() < PAD_LEN {
        return Err(CryptoError::CiphertextTooShort(ciphertext.len()));
    }
    Crypto::new(key)?.open(header, ciphertext, footer)
}

fn validate_key(key: &[u8]) -> Result<(), CryptoError> {
    match key.len() {
        0 => Err(CryptoError::EmptyKey),
        n if !(MIN_KEY_LEN..=MAX_KEY_LEN).contains(&n) => Err(CryptoError::KeyLength(n)),
        _ => Ok(()),
    }
}

fn salt_header(salt: &[u8]) -> Result<[u8; HEADER_LEN], CryptoError> {
    let salt: [u8; SALT_LEN] = salt
        .try_into()
        .map_err(|_| CryptoError::SaltLength(salt.len()))?;
    Ok(salt)
}

/// Generate a fresh salt from the operating system's CSPRNG
pub fn generate_salt() -> Result<[u8; SALT_LEN], CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    getrandom::fill(&mut salt).map_err(|_| CryptoError::RandomSource)?;
    Ok(salt)
}
