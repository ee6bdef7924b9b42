#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let ext = chatbak::extension(data);
    assert_eq!(ext.is_empty(), chatbak::sniff(data).is_none());
});
