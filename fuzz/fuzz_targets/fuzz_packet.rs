#![no_main]

use libfuzzer_sys::fuzz_target;
use secure_datagram::core::packet::{peek_type, Auth, Data, Hello, Htua, Olleh, PacketType};
use secure_datagram::utils::SessionKey;

fuzz_target!(|data: &[u8]| {
    let Ok(key) = SessionKey::new("fuzzing-session-key-000000") else {
        return;
    };

    // Decoders must reject malformed input without panicking
    match peek_type(data) {
        Ok(PacketType::Hello) => {
            let _ = Hello::decode(data);
        }
        Ok(PacketType::Olleh) => {
            let _ = Olleh::decode(data, |_| Ok(key.clone()));
        }
        Ok(PacketType::Auth) => {
            let _ = Auth::decode(data, |_| Ok(key.clone()));
        }
        Ok(PacketType::Htua) => {
            let _ = Htua::decode(data, &key);
        }
        Ok(PacketType::Data) => {
            let _ = Data::decode(data, |_| Ok(key.clone()));
        }
        Err(_) => {}
    }
});
