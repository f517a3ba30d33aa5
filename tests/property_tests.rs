//! Property-based tests using proptest
//!
//! These tests check the encryption engine and packet codec against randomly
//! generated keys, salts and payloads.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use secure_datagram::config::{FOOTER_LEN, HEADER_LEN, MAX_DATA_PAYLOAD, PAD_LEN};
use secure_datagram::core::packet::{peek_type, Data, PacketType};
use secure_datagram::core::xdr::{padding, Reader, Writer};
use secure_datagram::utils::crypto::{decrypt, encrypt};
use secure_datagram::utils::SessionKey;

fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 12..=64)
}

fn session_key() -> SessionKey {
    SessionKey::new("0123456789abcdef0123456789abcdef").unwrap()
}

// Property: whatever is sealed opens to the same bytes
proptest! {
    #[test]
    fn prop_seal_open_roundtrip(
        key in key_strategy(),
        salt in any::<[u8; 8]>(),
        plaintext in prop::collection::vec(any::<u8>(), 0..2048),
    ) {
        let sealed = encrypt(&salt, &key, &plaintext).unwrap();
        prop_assert_eq!(sealed.header, salt);
        prop_assert_eq!(sealed.ciphertext.len(), PAD_LEN + plaintext.len());
        prop_assert_eq!(sealed.wire_len(), HEADER_LEN + PAD_LEN + plaintext.len() + FOOTER_LEN);

        let opened = decrypt(&key, &sealed.header, &sealed.ciphertext, &sealed.footer).unwrap();
        prop_assert_eq!(opened, plaintext);
    }
}

// Property: flipping any single bit of a sealed body is detected
proptest! {
    #[test]
    fn prop_bit_flip_detected(
        key in key_strategy(),
        salt in any::<[u8; 8]>(),
        plaintext in prop::collection::vec(any::<u8>(), 1..256),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let sealed = encrypt(&salt, &key, &plaintext).unwrap();
        let mut body = Vec::new();
        body.extend_from_slice(&sealed.header);
        body.extend_from_slice(&sealed.ciphertext);
        body.extend_from_slice(&sealed.footer);

        let at = position.index(body.len());
        body[at] ^= 1 << bit;

        let (header, rest) = body.split_at(HEADER_LEN);
        let (ciphertext, footer) = rest.split_at(rest.len() - FOOTER_LEN);
        prop_assert!(decrypt(&key, header, ciphertext, footer).is_err());
    }
}

// Property: a different key never opens the body
proptest! {
    #[test]
    fn prop_wrong_key_rejected(
        key in key_strategy(),
        other in key_strategy(),
        salt in any::<[u8; 8]>(),
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        prop_assume!(key != other);
        let sealed = encrypt(&salt, &key, &plaintext).unwrap();
        prop_assert!(decrypt(&other, &sealed.header, &sealed.ciphertext, &sealed.footer).is_err());
    }
}

// Property: opaque fields are padded to a multiple of four and read back intact
proptest! {
    #[test]
    fn prop_opaque_padding(blob in prop::collection::vec(any::<u8>(), 0..300)) {
        let mut writer = Writer::with_capacity(blob.len() + 8);
        writer.put_opaque(&blob).unwrap();
        let bytes = writer.into_vec();
        prop_assert_eq!(bytes.len(), 4 + blob.len() + padding(blob.len()));
        prop_assert_eq!(bytes.len() % 4, 0);

        let mut reader = Reader::new(&bytes);
        prop_assert_eq!(reader.get_opaque(300).unwrap(), &blob[..]);
        prop_assert!(reader.finish().is_ok());
    }
}

// Property: Data packets up to the payload limit survive encode/decode
proptest! {
    #[test]
    fn prop_data_packet_roundtrip(
        header in any::<[u8; 8]>(),
        salt in any::<[u8; 8]>(),
        payload in prop::collection::vec(any::<u8>(), 0..=MAX_DATA_PAYLOAD),
    ) {
        let key = session_key();
        let bytes = Data::new(salt, payload.clone()).encode(&key, &header).unwrap();
        prop_assert_eq!(peek_type(&bytes).unwrap(), PacketType::Data);

        let received = Data::decode(&bytes, |h| {
            assert_eq!(h, &header);
            Ok(session_key())
        })
        .unwrap();
        prop_assert_eq!(received.header, header);
        prop_assert_eq!(received.packet.salt, salt);
        prop_assert_eq!(received.packet.payload, payload);
    }
}

// Property: arbitrary bytes never panic the decoder
proptest! {
    #[test]
    fn prop_decode_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = peek_type(&bytes);
        let _ = Data::decode(&bytes, |_| Ok(session_key()));
    }
}
