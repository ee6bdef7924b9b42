//! Container stream decoder.
//!
//! An encrypted container is `[16-byte salt][page 1 .. page N]` where every
//! page is `page_size` bytes and page 1 is physically shortened by the salt.
//! Decoding yields the plaintext of each page in order; the consumer writes
//! the standard SQLite header in front of page 1, since the salt took its
//! place on disk.

use crate::crypto::{HashAlgorithm, PageCipher, IV_SIZE, SALT_SIZE};
use crate::error::{BakError, Result};
use crate::file_media::FileCache;
use crate::key::RawKey;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Header of a plaintext SQLite database.
pub const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// Default page size of the reference deployment.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default PBKDF2 iteration count of the reference deployment.
pub const DEFAULT_KDF_ITERATIONS: u32 = 64_000;

const MIN_PAGE_SIZE: usize = 512;
const MAX_PAGE_SIZE: usize = 65536;

/// Cipher parameters of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerParams {
    pub page_size: usize,
    pub kdf_iterations: u32,
    pub hash: HashAlgorithm,
    /// Zero-fill each decoded page back to its physical size, so the output
    /// keeps the page size its SQLite header declares.
    pub keep_reserved: bool,
}

impl Default for ContainerParams {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            hash: HashAlgorithm::Sha1,
            keep_reserved: false,
        }
    }
}

impl ContainerParams {
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two()
            || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size)
        {
            return Err(BakError::InvalidParameters(format!(
                "page size {} must be a power of two between {} and {}",
                self.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }
        if self.kdf_iterations == 0 {
            return Err(BakError::InvalidParameters(
                "KDF iteration count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Totals reported after a full decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeSummary {
    pub pages: u32,
    pub bytes_written: u64,
}

/// Lazy, single-pass page decoder.
///
/// Iterating yields each page's plaintext in ascending order. The first
/// error ends the sequence; nothing after a failed page is produced.
pub struct ContainerDecoder<R> {
    reader: R,
    source: PathBuf,
    cipher: PageCipher,
    params: ContainerParams,
    page_count: u32,
    next_page: u32,
    page_buf: Vec<u8>,
    failed: bool,
}

impl<R: Read + Seek> ContainerDecoder<R> {
    /// Read the salt, derive keys and count pages.
    pub fn new(reader: R, key: &RawKey, params: ContainerParams) -> Result<Self> {
        Self::with_source(reader, PathBuf::from("<container>"), key, params)
    }

    fn with_source(
        mut reader: R,
        source: PathBuf,
        key: &RawKey,
        params: ContainerParams,
    ) -> Result<Self> {
        params.validate()?;

        let size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut salt = [0u8; SALT_SIZE];
        read_full(&mut reader, &mut salt, &source, 0)?;

        let cipher =
            PageCipher::from_raw_key(key.as_bytes(), &salt, params.kdf_iterations, params.hash)?;
        cipher.payload_len(params.page_size - SALT_SIZE)?;

        let page_count = u32::try_from(size / params.page_size as u64).map_err(|_| {
            BakError::InvalidParameters(format!("container of {size} bytes has too many pages"))
        })?;
        let trailing = size % params.page_size as u64;
        if trailing != 0 {
            tracing::debug!(trailing, "ignoring bytes past the last full page");
        }
        tracing::debug!(
            source = %source.display(),
            size,
            page_count,
            page_size = params.page_size,
            hash = %params.hash,
            "opened container"
        );

        Ok(Self {
            reader,
            source,
            cipher,
            params,
            page_count,
            next_page: 1,
            page_buf: vec![0u8; params.page_size],
            failed: false,
        })
    }

    /// Number of full pages in the container.
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn params(&self) -> &ContainerParams {
        &self.params
    }

    pub fn cipher(&self) -> &PageCipher {
        &self.cipher
    }

    fn read_page(&mut self, page: u32) -> Result<Vec<u8>> {
        let (offset, len) = if page == 1 {
            (SALT_SIZE as u64, self.params.page_size - SALT_SIZE)
        } else {
            (
                u64::from(page - 1) * self.params.page_size as u64,
                self.params.page_size,
            )
        };

        self.reader.seek(SeekFrom::Start(offset))?;
        let buf = &mut self.page_buf[..len];
        read_full(&mut self.reader, buf, &self.source, offset)?;

        let mut plain = self.cipher.decode_page(buf, page)?;
        if self.params.keep_reserved {
            plain.resize(len, 0);
        }
        tracing::trace!(page, len = plain.len(), "decoded page");
        Ok(plain)
    }

    /// Write the SQLite header followed by every decoded page.
    ///
    /// Aborts on the first failing page; what was already written is not a
    /// usable database.
    pub fn decode_to<W: Write>(self, mut writer: W) -> Result<DecodeSummary> {
        writer.write_all(SQLITE_HEADER)?;
        let mut summary = DecodeSummary {
            pages: 0,
            bytes_written: SQLITE_HEADER.len() as u64,
        };
        for page in self {
            let page = page?;
            writer.write_all(&page)?;
            summary.pages += 1;
            summary.bytes_written += page.len() as u64;
        }
        writer.flush()?;
        Ok(summary)
    }
}

impl<R: Read + Seek> Iterator for ContainerDecoder<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next_page > self.page_count {
            return None;
        }
        let page = self.next_page;
        self.next_page += 1;
        match self.read_page(page) {
            Ok(plain) => Some(Ok(plain)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        let left = (self.page_count + 1 - self.next_page) as usize;
        (0, Some(left))
    }
}

impl<'a, S: Read + Seek> ContainerDecoder<&'a mut S> {
    /// Decode the container at `path` through `cache`'s handle for it.
    ///
    /// Every page read seeks explicitly, so the handle's position on entry
    /// does not matter.
    pub fn from_cache(
        cache: &'a mut FileCache<S>,
        path: &Path,
        key: &RawKey,
        params: ContainerParams,
    ) -> Result<Self> {
        let handle = cache.open(path)?;
        Self::with_source(handle, path.to_path_buf(), key, params)
    }
}

/// Decode `input` into a plaintext database at `output`.
///
/// Output goes to a `.part` sibling first and is renamed into place only
/// after every page decoded, so a failed run leaves no output behind.
pub fn decode_file(
    input: &Path,
    output: &Path,
    key: &RawKey,
    params: ContainerParams,
) -> Result<DecodeSummary> {
    let _span = tracing::info_span!("decode_file", input = %input.display()).entered();

    let mut cache = FileCache::new();
    let decoder = ContainerDecoder::from_cache(&mut cache, input, key, params)?;
    let partial = partial_path(output);
    let file = File::create(&partial).map_err(|e| {
        BakError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", partial.display(), e),
        ))
    })?;

    let result = decoder.decode_to(BufWriter::new(file));
    cache.drop_all();
    match result {
        Ok(summary) => {
            fs::rename(&partial, output)?;
            tracing::info!(
                pages = summary.pages,
                bytes = summary.bytes_written,
                output = %output.display(),
                "container decoded"
            );
            Ok(summary)
        }
        Err(e) => {
            if let Err(rm) = fs::remove_file(&partial) {
                tracing::warn!(error = %rm, path = %partial.display(), "could not remove partial output");
            }
            Err(e)
        }
    }
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8], source: &Path, offset: u64) -> Result<()> {
    let mut got = 0;
    while got < buf.len() {
        match reader.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    if got != buf.len() {
        return Err(BakError::ShortRead {
            path: source.to_path_buf(),
            offset,
            expected: buf.len(),
            got,
        });
    }
    Ok(())
}

/// Build an encrypted container from plaintext pages.
///
/// Page 1's plaintext must be `page_size - 16 - reserved` bytes long, every
/// other page `page_size - reserved`. IVs are derived from the page number so
/// output is reproducible.
pub fn encode_container(
    pages: &[Vec<u8>],
    key: &RawKey,
    salt: &[u8; SALT_SIZE],
    params: ContainerParams,
) -> Result<Vec<u8>> {
    params.validate()?;
    let cipher =
        PageCipher::from_raw_key(key.as_bytes(), salt, params.kdf_iterations, params.hash)?;

    let mut out = Vec::with_capacity(pages.len() * params.page_size);
    out.extend_from_slice(salt);
    for (i, plain) in pages.iter().enumerate() {
        let page_no = u32::try_from(i + 1)
            .map_err(|_| BakError::InvalidParameters("too many pages".into()))?;
        let physical = if page_no == 1 {
            params.page_size - SALT_SIZE
        } else {
            params.page_size
        };
        if plain.len() + cipher.reserved_size() != physical {
            return Err(BakError::InvalidParameters(format!(
                "page {} plaintext is {} bytes, expected {}",
                page_no,
                plain.len(),
                physical.saturating_sub(cipher.reserved_size())
            )));
        }
        let mut iv = [0u8; IV_SIZE];
        iv[..4].copy_from_slice(&page_no.to_be_bytes());
        iv[4..].copy_from_slice(&salt[4..]);
        out.extend_from_slice(&cipher.encode_page(plain, page_no, &iv)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Cursor;

    const SALT: [u8; SALT_SIZE] = [0xA5; SALT_SIZE];

    fn key() -> RawKey {
        RawKey::from_hex("000102030405060708090a0b0c0d0e0f").unwrap()
    }

    fn params() -> ContainerParams {
        ContainerParams {
            page_size: 1024,
            kdf_iterations: 2,
            ..ContainerParams::default()
        }
    }

    fn plain_pages(count: usize) -> Vec<Vec<u8>> {
        (0..count)
            .map(|i| {
                let len = if i == 0 { 1024 - 16 - 48 } else { 1024 - 48 };
                (0..len).map(|b| (b as u8) ^ (i as u8 * 17)).collect()
            })
            .collect()
    }

    #[test]
    fn test_params_validation() {
        assert!(ContainerParams::default().validate().is_ok());
        let bad = ContainerParams { page_size: 1000, ..params() };
        assert_eq!(bad.validate().unwrap_err().kind(), ErrorKind::Format);
        let bad = ContainerParams { kdf_iterations: 0, ..params() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_iterates_pages_in_order() {
        let pages = plain_pages(3);
        let data = encode_container(&pages, &key(), &SALT, params()).unwrap();
        assert_eq!(data.len(), 3 * 1024);

        let decoder = ContainerDecoder::new(Cursor::new(data), &key(), params()).unwrap();
        assert_eq!(decoder.page_count(), 3);
        let decoded: Vec<Vec<u8>> = decoder.collect::<Result<_>>().unwrap();
        assert_eq!(decoded, pages);
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let pages = plain_pages(2);
        let mut data = encode_container(&pages, &key(), &SALT, params()).unwrap();
        data.extend_from_slice(&[0x55; 700]);

        let decoder = ContainerDecoder::new(Cursor::new(data), &key(), params()).unwrap();
        assert_eq!(decoder.page_count(), 2);
        assert_eq!(decoder.count(), 2);
    }

    #[test]
    fn test_keep_reserved_restores_page_size() {
        let pages = plain_pages(2);
        let data = encode_container(&pages, &key(), &SALT, params()).unwrap();
        let p = ContainerParams { keep_reserved: true, ..params() };

        let mut out = Vec::new();
        let summary = ContainerDecoder::new(Cursor::new(data), &key(), p)
            .unwrap()
            .decode_to(&mut out)
            .unwrap();
        assert_eq!(summary.pages, 2);
        assert_eq!(out.len(), 2 * 1024);
        assert_eq!(&out[..16], SQLITE_HEADER);
        assert_eq!(&out[16..16 + pages[0].len()], &pages[0][..]);
        assert!(out[16 + pages[0].len()..1024].iter().all(|&b| b == 0));
        assert_eq!(&out[1024..1024 + pages[1].len()], &pages[1][..]);
    }

    #[test]
    fn test_failure_fuses_iterator() {
        let pages = plain_pages(3);
        let mut data = encode_container(&pages, &key(), &SALT, params()).unwrap();
        data[1024 + 10] ^= 0x80;

        let mut decoder = ContainerDecoder::new(Cursor::new(data), &key(), params()).unwrap();
        assert!(decoder.next().unwrap().is_ok());
        assert!(matches!(
            decoder.next(),
            Some(Err(BakError::Authentication { page: 2 }))
        ));
        assert!(decoder.next().is_none());
    }

    #[test]
    fn test_wrong_key_fails_first_page() {
        let data = encode_container(&plain_pages(1), &key(), &SALT, params()).unwrap();
        let other = RawKey::from_hex("ffffffffffffffffffffffffffffffff").unwrap();
        let mut out = Vec::new();
        let err = ContainerDecoder::new(Cursor::new(data), &other, params())
            .unwrap()
            .decode_to(&mut out)
            .unwrap_err();
        assert!(matches!(err, BakError::Authentication { page: 1 }));
    }

    #[test]
    fn test_too_short_for_salt() {
        let err = ContainerDecoder::new(Cursor::new(vec![0u8; 8]), &key(), params())
            .err()
            .unwrap();
        assert!(matches!(err, BakError::ShortRead { expected: 16, got: 8, .. }));
    }

    #[test]
    fn test_smaller_than_one_page() {
        let decoder = ContainerDecoder::new(Cursor::new(vec![0u8; 600]), &key(), params()).unwrap();
        let mut out = Vec::new();
        let summary = decoder.decode_to(&mut out).unwrap();
        assert_eq!(summary.pages, 0);
        assert_eq!(out, SQLITE_HEADER);
    }

    #[test]
    fn test_decodes_through_cache() {
        let pages = plain_pages(3);
        let data = encode_container(&pages, &key(), &SALT, params()).unwrap();
        let opens = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = opens.clone();
        let mut cache = FileCache::with_opener(move |path: &Path| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            match path.to_str() {
                Some("Backup.db") => Ok(Cursor::new(data.clone())),
                _ => Err(std::io::Error::new(std::io::ErrorKind::NotFound, "absent")),
            }
        });
        let path = Path::new("Backup.db");

        // leave the cached handle somewhere in the middle of page 2
        cache.read_range(path, 1500, 8).unwrap();
        let decoder = ContainerDecoder::from_cache(&mut cache, path, &key(), params()).unwrap();
        let decoded: Vec<Vec<u8>> = decoder.collect::<Result<_>>().unwrap();
        assert_eq!(decoded, pages);

        let mut out = Vec::new();
        let summary = ContainerDecoder::from_cache(&mut cache, path, &key(), params())
            .unwrap()
            .decode_to(&mut out)
            .unwrap();
        assert_eq!(summary.pages, 3);
        assert_eq!(opens.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);

        let other = Path::new("other.db");
        let err = ContainerDecoder::from_cache(&mut cache, other, &key(), params())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("other.db"));
    }

    #[test]
    fn test_decode_file_leaves_nothing_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("Backup.db");
        let output = dir.path().join("plain.db");

        let mut data = encode_container(&plain_pages(2), &key(), &SALT, params()).unwrap();
        let last = data.len() - 1 - 48 + 20;
        data[last] ^= 1;
        fs::write(&input, &data).unwrap();

        assert!(decode_file(&input, &output, &key(), params()).is_err());
        assert!(!output.exists());
        assert!(!partial_path(&output).exists());
    }
}
