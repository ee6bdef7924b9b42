//! Single-page codec for encrypted containers.
//!
//! Page layout (`page_len` bytes, page 1 excludes the salt prefix):
//! - `[0, page_len - reserved)`: AES-CBC ciphertext
//! - next 16 bytes: IV
//! - next `hmac_size` bytes: HMAC tag
//! - rest of the reserved region: unused
//!
//! The tag covers `ciphertext || iv || le32(page_index)`.

use super::{cbc_decrypt, cbc_encrypt, derive_keys, DerivedKeySet, HashAlgorithm, PageMac};
use super::{BLOCK_SIZE, IV_SIZE, SALT_SIZE};
use crate::error::{BakError, Result};

/// Size of the per-page trailer holding IV and tag, rounded up to whole blocks.
pub const fn reserved_size(hmac_size: usize) -> usize {
    (IV_SIZE + hmac_size).div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// Authenticating page cipher bound to one container's derived keys.
#[derive(Debug, Clone)]
pub struct PageCipher {
    keys: DerivedKeySet,
    hash: HashAlgorithm,
    reserved: usize,
}

impl PageCipher {
    pub fn new(keys: DerivedKeySet, hash: HashAlgorithm) -> Self {
        Self {
            keys,
            hash,
            reserved: reserved_size(hash.output_size()),
        }
    }

    /// Derive keys from raw key material and the container salt.
    pub fn from_raw_key(
        raw_key: &[u8],
        salt: &[u8; SALT_SIZE],
        iterations: u32,
        hash: HashAlgorithm,
    ) -> Result<Self> {
        let keys = derive_keys(raw_key, salt, iterations, hash)?;
        Ok(Self::new(keys, hash))
    }

    pub fn reserved_size(&self) -> usize {
        self.reserved
    }

    pub fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    pub fn keys(&self) -> &DerivedKeySet {
        &self.keys
    }

    /// Plaintext length of a page of `page_len` physical bytes.
    pub fn payload_len(&self, page_len: usize) -> Result<usize> {
        let payload = page_len
            .checked_sub(self.reserved)
            .filter(|&n| n >= BLOCK_SIZE)
            .ok_or_else(|| {
                BakError::InvalidParameters(format!(
                    "page of {} bytes cannot hold a {}-byte reserved region",
                    page_len, self.reserved
                ))
            })?;
        if payload % BLOCK_SIZE != 0 {
            return Err(BakError::InvalidParameters(format!(
                "page payload of {payload} bytes is not block aligned"
            )));
        }
        Ok(payload)
    }

    fn tag(&self, ciphertext: &[u8], iv: &[u8], page_index: u32) -> Result<PageMac> {
        let mut mac = PageMac::new(self.hash, self.keys.hmac_key())?;
        mac.update(ciphertext);
        mac.update(iv);
        mac.update(&page_index.to_le_bytes());
        Ok(mac)
    }

    /// Verify and decrypt one page.
    ///
    /// Returns `page_len - reserved` plaintext bytes. On tag mismatch no
    /// plaintext is returned.
    pub fn decode_page(&self, raw_page: &[u8], page_index: u32) -> Result<Vec<u8>> {
        let payload = self.payload_len(raw_page.len())?;
        let hmac_size = self.hash.output_size();

        let (ciphertext, trailer) = raw_page.split_at(payload);
        let iv = &trailer[..IV_SIZE];
        let stored_tag = &trailer[IV_SIZE..IV_SIZE + hmac_size];

        if !self.tag(ciphertext, iv, page_index)?.verify(stored_tag) {
            tracing::debug!(page = page_index, "page HMAC mismatch");
            return Err(BakError::Authentication { page: page_index });
        }

        let mut plain = ciphertext.to_vec();
        cbc_decrypt(self.keys.page_key(), iv, &mut plain)?;
        Ok(plain)
    }

    /// Encrypt and tag one page. Inverse of [`decode_page`](Self::decode_page).
    ///
    /// The result is `plaintext.len() + reserved` bytes; unused trailer bytes
    /// are zero.
    pub fn encode_page(
        &self,
        plaintext: &[u8],
        page_index: u32,
        iv: &[u8; IV_SIZE],
    ) -> Result<Vec<u8>> {
        if plaintext.is_empty() || plaintext.len() % BLOCK_SIZE != 0 {
            return Err(BakError::UnalignedChunk(plaintext.len()));
        }
        let hmac_size = self.hash.output_size();

        let mut page = Vec::with_capacity(plaintext.len() + self.reserved);
        page.extend_from_slice(plaintext);
        cbc_encrypt(self.keys.page_key(), iv, &mut page)?;

        let tag = self.tag(&page, iv, page_index)?.finalize();
        page.extend_from_slice(iv);
        page.extend_from_slice(&tag[..hmac_size]);
        page.resize(plaintext.len() + self.reserved, 0);
        Ok(page)
    }
}
