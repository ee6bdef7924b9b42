#![no_main]
use chatbak::{HashAlgorithm, PageCipher};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Any page must be rejected cleanly; forging a tag is not expected.
    let Ok(cipher) = PageCipher::from_raw_key(&[0x42; 16], &[0x24; 16], 1, HashAlgorithm::Sha1)
    else {
        return;
    };
    let page_index = data.first().copied().unwrap_or(1) as u32;
    let _ = cipher.decode_page(data, page_index);
});
