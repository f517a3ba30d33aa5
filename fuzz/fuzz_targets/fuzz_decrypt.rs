#![no_main]

use libfuzzer_sys::fuzz_target;
use secure_datagram::utils::crypto::{decrypt, encrypt};

fuzz_target!(|data: &[u8]| {
    if data.len() < 16 {
        return;
    }
    let (key, body) = data.split_at(16);

    // Random bodies are rejected without panicking
    if body.len() >= 20 {
        let (header, rest) = body.split_at(8);
        let (ciphertext, footer) = rest.split_at(rest.len() - 8);
        let _ = decrypt(key, header, ciphertext, footer);
    }

    // And anything sealed must open again
    let salt = [0x5Au8; 8];
    if let Ok(sealed) = encrypt(&salt, key, body) {
        let opened = decrypt(key, &sealed.header, &sealed.ciphertext, &sealed.footer);
        assert_eq!(opened.ok().as_deref(), Some(body));
    }
});
