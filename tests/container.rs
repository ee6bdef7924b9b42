//! End-to-end container decoding against files on disk.

use chatbak::{
    decode_file, encode_container, BakError, ContainerDecoder, ContainerParams, ErrorKind,
    HashAlgorithm, KeyEncoding, RawKey, SQLITE_HEADER,
};
use proptest::prelude::*;
use std::io::Cursor;

const KEY: &str = "7f3a9c0e5b1d2468ace013579bdf8642";
const SALT: [u8; 16] = *b"chatbak-saltsalt";

fn params(page_size: usize) -> ContainerParams {
    ContainerParams {
        page_size,
        kdf_iterations: 2,
        hash: HashAlgorithm::Sha1,
        keep_reserved: false,
    }
}

fn pages(page_size: usize, reserved: usize, count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let len = page_size - reserved - if i == 0 { 16 } else { 0 };
            (0..len).map(|j| (j * 7 + i * 13) as u8).collect()
        })
        .collect()
}

#[test]
fn two_page_container_decodes_to_header_and_pages() {
    let key = RawKey::from_hex(KEY).unwrap();
    let plain = pages(4096, 48, 2);
    let data = encode_container(&plain, &key, &SALT, params(4096)).unwrap();
    assert_eq!(data.len(), 8192);

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("Backup.db");
    let output = dir.path().join("Backup_plain.db");
    std::fs::write(&input, &data).unwrap();

    let summary = decode_file(&input, &output, &key, params(4096)).unwrap();
    assert_eq!(summary.pages, 2);

    let out = std::fs::read(&output).unwrap();
    let mut expected = SQLITE_HEADER.to_vec();
    expected.extend_from_slice(&plain[0]);
    expected.extend_from_slice(&plain[1]);
    assert_eq!(out, expected);
    assert_eq!(summary.bytes_written, out.len() as u64);
}

#[test]
fn ascii_key_material_uses_aes256_pages() {
    let key = RawKey::parse(KEY, KeyEncoding::Ascii).unwrap();
    let plain = pages(1024, 48, 3);
    let data = encode_container(&plain, &key, &SALT, params(1024)).unwrap();

    let decoded: Vec<Vec<u8>> = ContainerDecoder::new(Cursor::new(&data), &key, params(1024))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(decoded, plain);

    // the same string as hex-decoded material is a different key
    let hex_key = RawKey::from_hex(KEY).unwrap();
    let err = ContainerDecoder::new(Cursor::new(&data), &hex_key, params(1024))
        .unwrap()
        .next()
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[test]
fn sha512_containers_use_larger_reserved_region() {
    let key = RawKey::from_hex(KEY).unwrap();
    let p = ContainerParams {
        hash: HashAlgorithm::Sha512,
        ..params(1024)
    };
    let plain = pages(1024, 80, 2);
    let data = encode_container(&plain, &key, &SALT, p).unwrap();
    let decoded: Vec<Vec<u8>> = ContainerDecoder::new(Cursor::new(&data), &key, p)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(decoded, plain);
}

#[test]
fn missing_input_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let key = RawKey::from_hex(KEY).unwrap();
    let err = decode_file(
        &dir.path().join("absent.db"),
        &dir.path().join("out.db"),
        &key,
        params(1024),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(err.to_string().contains("absent.db"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Flipping any authenticated bit of any page aborts at that page.
    #[test]
    fn any_authenticated_bit_flip_is_detected(
        page in 0usize..3,
        pos in 0usize..(1024 - 48 + 16 + 20),
        bit in 0u8..8,
    ) {
        let key = RawKey::from_hex(KEY).unwrap();
        let plain = pages(1024, 48, 3);
        let mut data = encode_container(&plain, &key, &SALT, params(1024)).unwrap();

        // page 1 starts after the salt and is 16 bytes shorter
        let (start, authenticated) = if page == 0 {
            (16, 1024 - 16 - 48 + 16 + 20)
        } else {
            (page * 1024, 1024 - 48 + 16 + 20)
        };
        prop_assume!(pos < authenticated);
        data[start + pos] ^= 1 << bit;

        let results: Vec<_> = ContainerDecoder::new(Cursor::new(&data), &key, params(1024))
            .unwrap()
            .collect();
        prop_assert_eq!(results.len(), page + 1);
        let failed_page = page as u32 + 1;
        let failed_at_page = matches!(
            results[page],
            Err(BakError::Authentication { page: p }) if p == failed_page
        );
        prop_assert!(failed_at_page);
    }
}
