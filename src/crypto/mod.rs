//! Cryptographic primitives for backup containers and resource chunks.
//!
//! Containers use AES-CBC pages authenticated with HMAC, keyed through
//! PBKDF2 (SQLCipher style). Resource chunks use plain AES-128-ECB with the
//! first 16 bytes of the raw key.

mod chunk;
mod kdf;
mod page;

pub use chunk::{decrypt_chunk, decrypt_chunk_in_place, encrypt_chunk, strip_pkcs7, RangePosition};
pub use kdf::{derive_keys, DerivedKeySet, FAST_KDF_ITERATIONS, HMAC_SALT_MASK};
pub use page::{reserved_size, PageCipher};

use crate::error::{BakError, Result};
use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha512};

/// AES block size.
pub const BLOCK_SIZE: usize = 16;
/// Per-page IV size.
pub const IV_SIZE: usize = BLOCK_SIZE;
/// Salt prefix stored in the first 16 bytes of a container.
pub const SALT_SIZE: usize = BLOCK_SIZE;

/// Digest used for PBKDF2 and the page HMAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// HMAC-SHA1, 20-byte tags (reference deployment)
    #[default]
    Sha1,
    /// HMAC-SHA256, 32-byte tags
    Sha256,
    /// HMAC-SHA512, 64-byte tags
    Sha512,
}

impl HashAlgorithm {
    /// Size in bytes of an HMAC tag produced with this digest.
    pub const fn output_size(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for HashAlgorithm {
    type Err = BakError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(BakError::InvalidParameters(format!(
                "unknown hash algorithm: {other}"
            ))),
        }
    }
}

/// Running HMAC over one page, dispatched on the configured digest.
enum PageMac {
    Sha1(Hmac<Sha1>),
    Sha256(Hmac<Sha256>),
    Sha512(Hmac<Sha512>),
}

impl PageMac {
    fn new(hash: HashAlgorithm, key: &[u8]) -> Result<Self> {
        let bad_key = |_| BakError::InvalidKey("unusable HMAC key".into());
        Ok(match hash {
            HashAlgorithm::Sha1 => Self::Sha1(Hmac::new_from_slice(key).map_err(bad_key)?),
            HashAlgorithm::Sha256 => Self::Sha256(Hmac::new_from_slice(key).map_err(bad_key)?),
            HashAlgorithm::Sha512 => Self::Sha512(Hmac::new_from_slice(key).map_err(bad_key)?),
        })
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(m) => m.update(data),
            Self::Sha256(m) => m.update(data),
            Self::Sha512(m) => m.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Self::Sha1(m) => m.finalize().into_bytes().to_vec(),
            Self::Sha256(m) => m.finalize().into_bytes().to_vec(),
            Self::Sha512(m) => m.finalize().into_bytes().to_vec(),
        }
    }

    /// Constant-time comparison against a stored tag.
    fn verify(self, tag: &[u8]) -> bool {
        match self {
            Self::Sha1(m) => m.verify_slice(tag).is_ok(),
            Self::Sha256(m) => m.verify_slice(tag).is_ok(),
            Self::Sha512(m) => m.verify_slice(tag).is_ok(),
        }
    }
}

fn cbc_key_error(len: usize) -> BakError {
    BakError::InvalidKey(format!(
        "page key must be 16, 24 or 32 bytes, got {len}"
    ))
}

/// Decrypt `data` in place with AES-CBC, key size picked from `key.len()`.
fn cbc_decrypt(key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<()> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(BakError::UnalignedChunk(data.len()));
    }
    let len = data.len();
    match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|_| cbc_key_error(key.len()))?
            .decrypt_padded_mut::<NoPadding>(data)
            .map(|_| ())
            .map_err(|_| BakError::UnalignedChunk(len)),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(|_| cbc_key_error(key.len()))?
            .decrypt_padded_mut::<NoPadding>(data)
            .map(|_| ())
            .map_err(|_| BakError::UnalignedChunk(len)),
        32 => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|_| cbc_key_error(key.len()))?
            .decrypt_padded_mut::<NoPadding>(data)
            .map(|_| ())
            .map_err(|_| BakError::UnalignedChunk(len)),
        n => Err(cbc_key_error(n)),
    }
}

/// Encrypt `data` in place with AES-CBC. Inverse of [`cbc_decrypt`].
fn cbc_encrypt(key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<()> {
    let len = data.len();
    if len % BLOCK_SIZE != 0 {
        return Err(BakError::UnalignedChunk(len));
    }
    match key.len() {
        16 => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|_| cbc_key_error(key.len()))?
            .encrypt_padded_mut::<NoPadding>(data, len)
            .map(|_| ())
            .map_err(|_| BakError::UnalignedChunk(len)),
        24 => cbc::Encryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(|_| cbc_key_error(key.len()))?
            .encrypt_padded_mut::<NoPadding>(data, len)
            .map(|_| ())
            .map_err(|_| BakError::UnalignedChunk(len)),
        32 => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|_| cbc_key_error(key.len()))?
            .encrypt_padded_mut::<NoPadding>(data, len)
            .map(|_| ())
            .map_err(|_| BakError::UnalignedChunk(len)),
        n => Err(cbc_key_error(n)),
    }
}
