#![no_main]
use chatbak::crypto::{decrypt_chunk, strip_pkcs7};
use chatbak::RangePosition;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let key = [0x5Au8; 16];
    if let Ok(out) = decrypt_chunk(&key, data, RangePosition::GroupTerminal) {
        assert!(out.len() <= data.len());
        assert!(data.len() - out.len() <= 16);
    }

    let mut buf = data.to_vec();
    let before = buf.len();
    if strip_pkcs7(&mut buf) {
        assert!(before - buf.len() >= 1 && before - buf.len() <= 16);
    } else {
        assert_eq!(buf, data);
    }
});
