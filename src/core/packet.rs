//! # Packet Codec
//!
//! Encoding and decoding of the five packet kinds.
//!
//! | Type  | Tag | Prologue          | Encrypted body                             |
//! |-------|-----|-------------------|--------------------------------------------|
//! | Hello | 1   | sender public key | none                                       |
//! | Olleh | 2   | server public key | need_login, need_pass                      |
//! | Auth  | 4   | client public key | salt, login, pass, proposed session key    |
//! | Htua  | 5   | none              | new salt                                   |
//! | Data  | 8   | none              | new salt, payload (at most 1024 bytes)     |
//!
//! An encrypted body is `header(8) | ciphertext | footer(8)` and runs to the
//! end of the datagram. The type tag is validated before anything else is
//! read, and the body is split with checked arithmetic so a short datagram is
//! a `CodecError`, never a panic.

use crate::config::{FOOTER_LEN, HEADER_LEN, MAX_DATA_PAYLOAD, MAX_KEY_LEN, SALT_LEN};
use crate::core::xdr::{opaque_len, Reader, Writer};
use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::{self, Sealed};
use crate::utils::keys::SessionKey;
use std::fmt;
use x25519_dalek::PublicKey;

/// 8-byte rolling nonce
pub type Salt = [u8; SALT_LEN];

/// Longest login or password accepted in an Auth body
pub const MAX_CREDENTIAL_LEN: usize = 1024;

const PUBLIC_KEY_LEN: usize = 32;

/// Four-byte type tag at the start of every packet
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Hello = 1,
    Olleh = 2,
    Auth = 4,
    Htua = 5,
    Data = 8,
}

impl TryFrom<u32> for PacketType {
    type Error = ProtocolError;

    fn try_from(tag: u32) -> Result<Self> {
        match tag {
            1 => Ok(Self::Hello),
            2 => Ok(Self::Olleh),
            4 => Ok(Self::Auth),
            5 => Ok(Self::Htua),
            8 => Ok(Self::Data),
            other => Err(ProtocolError::InvalidPacketType(other)),
        }
    }
}

/// Read the type tag without decoding anything else
pub fn peek_type(bytes: &[u8]) -> Result<PacketType> {
    Reader::new(bytes).get_u32().and_then(PacketType::try_from)
}

/// Consume the tag and require it to be `expected`
fn expect_type(reader: &mut Reader<'_>, expected: PacketType) -> Result<()> {
    let found = PacketType::try_from(reader.get_u32()?)?;
    if found == expected {
        Ok(())
    } else {
        Err(ProtocolError::InvalidPacketType(found as u32))
    }
}

/// What a server advertises in its Olleh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerInfo {
    pub public_key: PublicKey,
    pub need_login: bool,
    pub need_pass: bool,
}

/// Login material carried encrypted in Auth
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub login: String,
    pub pass: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            pass: pass.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("pass", &"<redacted>")
            .finish()
    }
}

/// A decoded encrypted packet together with the header salt it arrived under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received<T> {
    pub header: Salt,
    pub packet: T,
}

/// Opening move of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    pub public_key: PublicKey,
}

/// Server reply to Hello
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Olleh {
    pub info: ServerInfo,
}

/// Client credentials and proposed session key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    pub public_key: PublicKey,
    pub salt: Salt,
    pub credentials: Credentials,
    pub session_key: SessionKey,
}

/// Server acknowledgement of Auth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Htua {
    pub salt: Salt,
}

/// Application payload on an established session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub salt: Salt,
    pub payload: Vec<u8>,
}

impl Hello {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = Writer::with_capacity(4 + opaque_len(PUBLIC_KEY_LEN));
        w.put_u32(PacketType::Hello as u32);
        w.put_opaque(self.public_key.as_bytes())?;
        Ok(w.into_vec())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        expect_type(&mut r, PacketType::Hello)?;
        let public_key = read_public_key(&mut r)?;
        r.finish()?;
        Ok(Self { public_key })
    }
}

impl Olleh {
    /// Encode under the key shared with the client
    pub fn encode(&self, key: &SessionKey, salt: &Salt) -> Result<Vec<u8>> {
        let mut body = Writer::with_capacity(8);
        body.put_i32(i32::from(self.info.need_login));
        body.put_i32(i32::from(self.info.need_pass));

        let mut w = Writer::with_capacity(64);
        w.put_u32(PacketType::Olleh as u32);
        w.put_opaque(self.info.public_key.as_bytes())?;
        seal_into(&mut w, key, salt, &body.into_vec())?;
        Ok(w.into_vec())
    }

    /// Decode, deriving the body key from the server public key in the prologue
    pub fn decode<F>(bytes: &[u8], derive: F) -> Result<Received<Self>>
    where
        F: FnOnce(&PublicKey) -> Result<SessionKey>,
    {
        let mut r = Reader::new(bytes);
        expect_type(&mut r, PacketType::Olleh)?;
        let public_key = read_public_key(&mut r)?;
        let (header, ciphertext, footer) = split_sealed(r.rest())?;
        let key = derive(&public_key)?;
        let plain = open(&key, header, ciphertext, footer)?;

        let mut body = Reader::new(&plain);
        let need_login = body.get_i32()? != 0;
        let need_pass = body.get_i32()? != 0;
        body.finish()?;

        Ok(Received {
            header: to_salt(header)?,
            packet: Self {
                info: ServerInfo {
                    public_key,
                    need_login,
                    need_pass,
                },
            },
        })
    }
}

impl Auth {
    /// Encode under the key shared with the server
    pub fn encode(&self, key: &SessionKey, salt: &Salt) -> Result<Vec<u8>> {
        let login = &self.credentials.login;
        let pass = &self.credentials.pass;
        if login.len() > MAX_CREDENTIAL_LEN || pass.len() > MAX_CREDENTIAL_LEN {
            return Err(ProtocolError::CodecError(constants::ERR_OVERSIZED_PAYLOAD));
        }

        let mut body = Writer::with_capacity(
            opaque_len(SALT_LEN)
                + opaque_len(login.len())
                + opaque_len(pass.len())
                + opaque_len(MAX_KEY_LEN),
        );
        body.put_opaque(&self.salt)?;
        body.put_string(login)?;
        body.put_string(pass)?;
        body.put_string(self.session_key.as_str())?;

        let mut w = Writer::with_capacity(64 + body.len());
        w.put_u32(PacketType::Auth as u32);
        w.put_opaque(self.public_key.as_bytes())?;
        seal_into(&mut w, key, salt, &body.into_vec())?;
        Ok(w.into_vec())
    }

    /// Decode, deriving the body key from the client public key in the prologue
    pub fn decode<F>(bytes: &[u8], derive: F) -> Result<Received<Self>>
    where
        F: FnOnce(&PublicKey) -> Result<SessionKey>,
    {
        let mut r = Reader::new(bytes);
        expect_type(&mut r, PacketType::Auth)?;
        let public_key = read_public_key(&mut r)?;
        let (header, ciphertext, footer) = split_sealed(r.rest())?;
        let key = derive(&public_key)?;
        let plain = open(&key, header, ciphertext, footer)?;

        let mut body = Reader::new(&plain);
        let salt = body.get_fixed::<SALT_LEN>(constants::ERR_BAD_SALT)?;
        let login = body.get_string(MAX_CREDENTIAL_LEN)?;
        let pass = body.get_string(MAX_CREDENTIAL_LEN)?;
        let session_key = SessionKey::new(body.get_string(MAX_KEY_LEN)?)?;
        body.finish()?;

        Ok(Received {
            header: to_salt(header)?,
            packet: Self {
                public_key,
                salt,
                credentials: Credentials { login, pass },
                session_key,
            },
        })
    }
}

impl Htua {
    /// Encode under the session key the client proposed
    pub fn encode(&self, key: &SessionKey, salt: &Salt) -> Result<Vec<u8>> {
        let mut body = Writer::with_capacity(opaque_len(SALT_LEN));
        body.put_opaque(&self.salt)?;

        let mut w = Writer::with_capacity(64);
        w.put_u32(PacketType::Htua as u32);
        seal_into(&mut w, key, salt, &body.into_vec())?;
        Ok(w.into_vec())
    }

    pub fn decode(bytes: &[u8], key: &SessionKey) -> Result<Received<Self>> {
        let mut r = Reader::new(bytes);
        expect_type(&mut r, PacketType::Htua)?;
        let (header, ciphertext, footer) = split_sealed(r.rest())?;
        let plain = open(key, header, ciphertext, footer)?;

        let mut body = Reader::new(&plain);
        let salt = body.get_fixed::<SALT_LEN>(constants::ERR_BAD_SALT)?;
        body.finish()?;

        Ok(Received {
            header: to_salt(header)?,
            packet: Self { salt },
        })
    }
}

impl Data {
    pub fn new(salt: Salt, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            salt,
            payload: payload.into(),
        }
    }

    /// Encode under the session key, using the salt last received from the peer
    pub fn encode(&self, key: &SessionKey, salt: &Salt) -> Result<Vec<u8>> {
        if self.payload.len() > MAX_DATA_PAYLOAD {
            return Err(ProtocolError::CodecError(constants::ERR_OVERSIZED_PAYLOAD));
        }

        let mut body =
            Writer::with_capacity(opaque_len(SALT_LEN) + opaque_len(self.payload.len()));
        body.put_opaque(&self.salt)?;
        body.put_opaque(&self.payload)?;

        let mut w = Writer::with_capacity(32 + body.len());
        w.put_u32(PacketType::Data as u32);
        seal_into(&mut w, key, salt, &body.into_vec())?;
        Ok(w.into_vec())
    }

    /// Decode, looking the session key up by the header salt
    pub fn decode<F>(bytes: &[u8], lookup: F) -> Result<Received<Self>>
    where
        F: FnOnce(&Salt) -> Result<SessionKey>,
    {
        let mut r = Reader::new(bytes);
        expect_type(&mut r, PacketType::Data)?;
        let (header, ciphertext, footer) = split_sealed(r.rest())?;
        let header = to_salt(header)?;
        let key = lookup(&header)?;
        let plain = open(&key, &header, ciphertext, footer)?;

        let mut body = Reader::new(&plain);
        let salt = body.get_fixed::<SALT_LEN>(constants::ERR_BAD_SALT)?;
        let payload = body.get_opaque(MAX_DATA_PAYLOAD)?.to_vec();
        body.finish()?;

        Ok(Received {
            header,
            packet: Self { salt, payload },
        })
    }
}

fn read_public_key(r: &mut Reader<'_>) -> Result<PublicKey> {
    let bytes = r.get_fixed::<PUBLIC_KEY_LEN>(constants::ERR_BAD_PUBLIC_KEY)?;
    Ok(PublicKey::from(bytes))
}

fn to_salt(bytes: &[u8]) -> Result<Salt> {
    bytes
        .try_into()
        .map_err(|_| ProtocolError::CodecError(constants::ERR_BAD_SALT))
}

/// Split an encrypted body into header, ciphertext and footer
fn split_sealed(body: &[u8]) -> Result<(&[u8], &[u8], &[u8])> {
    let ciphertext_len = body
        .len()
        .checked_sub(HEADER_LEN)
        .and_then(|n| n.checked_sub(FOOTER_LEN))
        .ok_or(ProtocolError::CodecError(constants::ERR_MISSING_FRAME))?;

    let (header, rest) = body.split_at(HEADER_LEN);
    let (ciphertext, footer) = rest.split_at(ciphertext_len);
    Ok((header, ciphertext, footer))
}

fn seal_into(w: &mut Writer, key: &SessionKey, salt: &Salt, plaintext: &[u8]) -> Result<()> {
    let Sealed {
        header,
        ciphertext,
        footer,
    } = crypto::encrypt(salt, key.as_bytes(), plaintext)?;
    w.put_raw(&header);
    w.put_raw(&ciphertext);
    w.put_raw(&footer);
    Ok(())
}

fn open(key: &SessionKey, header: &[u8], ciphertext: &[u8], footer: &[u8]) -> Result<Vec<u8>> {
    Ok(crypto::decrypt(key.as_bytes(), header, ciphertext, footer)?)
}
