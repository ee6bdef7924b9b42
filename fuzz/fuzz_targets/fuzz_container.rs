#![no_main]
use chatbak::{ContainerDecoder, ContainerParams, RawKey};
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let Ok(key) = RawKey::from_hex("000102030405060708090a0b0c0d0e0f") else {
        return;
    };
    let params = ContainerParams {
        page_size: 512,
        kdf_iterations: 1,
        ..ContainerParams::default()
    };
    if let Ok(decoder) = ContainerDecoder::new(Cursor::new(data), &key, params) {
        let _ = decoder.decode_to(std::io::sink());
    }
});
