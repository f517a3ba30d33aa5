//! # Length-Prefixed Field Encoding
//!
//! Every field of a packet is encoded in network byte order:
//! - integers as 4-byte big-endian words
//! - strings and opaque blobs as a 4-byte big-endian length, the bytes, then
//!   zero padding up to the next 4-byte boundary
//!
//! [`Reader`] never does unchecked arithmetic on attacker-controlled lengths:
//! every advance is checked against the bytes that remain, and a short buffer
//! surfaces as `CodecError`.

use crate::error::{constants, ProtocolError, Result};
use bytes::{BufMut, BytesMut};

/// Bytes of zero padding needed after a field of `len` bytes
#[inline]
pub fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Encoded size of an opaque field holding `len` bytes
#[inline]
pub fn opaque_len(len: usize) -> usize {
    4 + len + padding(len)
}

/// Append-only encoder over a growable buffer
#[derive(Debug, Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    /// Length-prefixed, zero-padded opaque field.
    ///
    /// # Errors
    /// `CodecError` if `bytes` cannot be described by a 32-bit length.
    pub fn put_opaque(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| ProtocolError::CodecError(constants::ERR_OVERSIZED_PAYLOAD))?;
        self.buf.put_u32(len);
        self.buf.put_slice(bytes);
        self.buf.put_bytes(0, padding(bytes.len()));
        Ok(())
    }

    pub fn put_string(&mut self, value: &str) -> Result<()> {
        self.put_opaque(value.as_bytes())
    }

    /// Raw bytes with no length prefix (sealed body parts)
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Checked cursor over a received byte slice
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Consume exactly `n` bytes
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(ProtocolError::CodecError(constants::ERR_SHORT_BUFFER))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    /// Consume everything that is left
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos.min(self.buf.len())..];
        self.pos = self.buf.len();
        out
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Length-prefixed opaque field of at most `max` bytes
    pub fn get_opaque(&mut self, max: usize) -> Result<&'a [u8]> {
        let declared = self.get_u32()? as usize;
        if declared > max {
            return Err(ProtocolError::CodecError(constants::ERR_OVERSIZED_PAYLOAD));
        }
        if declared > self.remaining() {
            return Err(ProtocolError::CodecError(constants::ERR_LENGTH_OVERFLOW));
        }
        let bytes = self.take(declared)?;
        let pad = self.take(padding(declared))?;
        if pad.iter().any(|b| *b != 0) {
            return Err(ProtocolError::CodecError(constants::ERR_NONZERO_PADDING));
        }
        Ok(bytes)
    }

    /// Opaque field that must be exactly `N` bytes long
    pub fn get_fixed<const N: usize>(&mut self, err: &'static str) -> Result<[u8; N]> {
        let bytes = self.get_opaque(N).map_err(|e| match e {
            ProtocolError::CodecError(constants::ERR_OVERSIZED_PAYLOAD) => {
                ProtocolError::CodecError(err)
            }
            other => other,
        })?;
        bytes
            .try_into()
            .map_err(|_| ProtocolError::CodecError(err))
    }

    /// UTF-8 string of at most `max` bytes
    pub fn get_string(&mut self, max: usize) -> Result<String> {
        let bytes = self.get_opaque(max)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::CodecError(constants::ERR_INVALID_UTF8))
    }

    /// Fail if any byte is left over
    pub fn finish(&self) -> Result<()> {
        if self.is_exhausted() {
            Ok(())
        } else {
            Err(ProtocolError::CodecError(constants::ERR_TRAILING_BYTES))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_rules() {
        assert_eq!(padding(0), 0);
        assert_eq!(padding(1), 3);
        assert_eq!(padding(4), 0);
        assert_eq!(padding(5), 3);
        assert_eq!(opaque_len(32), 36);
        assert_eq!(opaque_len(5), 12);
    }

    #[test]
    fn test_opaque_layout() {
        let mut w = Writer::default();
        w.put_opaque(b"abcde").unwrap();
        assert_eq!(
            w.into_vec(),
            vec![0, 0, 0, 5, b'a', b'b', b'c', b'd', b'e', 0, 0, 0]
        );
    }

    #[test]
    fn test_read_back_fields() {
        let mut w = Writer::default();
        w.put_u32(8);
        w.put_i32(-1);
        w.put_string("login").unwrap();
        w.put_opaque(&[9u8; 8]).unwrap();
        let bytes = w.into_vec();

        let mut r = Reader::new(&bytes);
        assert_eq!(r.get_u32().unwrap(), 8);
        assert_eq!(r.get_i32().unwrap(), -1);
        assert_eq!(r.get_string(64).unwrap(), "login");
        assert_eq!(r.get_fixed::<8>("salt").unwrap(), [9u8; 8]);
        r.finish().unwrap();
    }

    #[test]
    fn test_declared_length_beyond_buffer() {
        let bytes = [0xFF, 0xFF, 0xFF, 0xF0, 1, 2];
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            r.get_opaque(usize::MAX),
            Err(ProtocolError::CodecError(constants::ERR_LENGTH_OVERFLOW))
        ));
    }

    #[test]
    fn test_fixed_rejects_wrong_length() {
        let mut w = Writer::default();
        w.put_opaque(&[1u8; 7]).unwrap();
        let bytes = w.into_vec();
        assert!(matches!(
            Reader::new(&bytes).get_fixed::<8>(constants::ERR_BAD_SALT),
            Err(ProtocolError::CodecError(constants::ERR_BAD_SALT))
        ));

        let mut w = Writer::default();
        w.put_opaque(&[1u8; 9]).unwrap();
        let bytes = w.into_vec();
        assert!(matches!(
            Reader::new(&bytes).get_fixed::<8>(constants::ERR_BAD_SALT),
            Err(ProtocolError::CodecError(constants::ERR_BAD_SALT))
        ));
    }

    #[test]
    fn test_nonzero_padding_rejected() {
        let bytes = [0, 0, 0, 1, 0xAA, 0, 1, 0];
        assert!(matches!(
            Reader::new(&bytes).get_opaque(16),
            Err(ProtocolError::CodecError(constants::ERR_NONZERO_PADDING))
        ));
    }

    #[test]
    fn test_short_buffer() {
        let mut r = Reader::new(&[0, 0]);
        assert!(matches!(
            r.get_u32(),
            Err(ProtocolError::CodecError(constants::ERR_SHORT_BUFFER))
        ));
        assert_eq!(r.remaining(), 2);
    }
}
