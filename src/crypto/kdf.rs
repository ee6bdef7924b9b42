//! PBKDF2 key derivation for container pages.
//!
//! Two keys come out of one raw key:
//! - page key: PBKDF2(raw key, salt, iterations)
//! - HMAC key: PBKDF2(page key, salt XOR 0x3a, 2 iterations)
//!
//! Both are `len(raw key)` bytes long.

use super::{HashAlgorithm, SALT_SIZE};
use crate::error::{BakError, Result};
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use std::fmt;
use zeroize::Zeroizing;

/// Byte mask applied to every salt byte before deriving the HMAC key.
pub const HMAC_SALT_MASK: u8 = 0x3a;

/// Iteration count for the HMAC key derivation.
pub const FAST_KDF_ITERATIONS: u32 = 2;

/// Page and HMAC keys derived for one container.
#[derive(Clone)]
pub struct DerivedKeySet {
    page_key: Zeroizing<Vec<u8>>,
    hmac_key: Zeroizing<Vec<u8>>,
}

impl DerivedKeySet {
    pub fn page_key(&self) -> &[u8] {
        &self.page_key
    }

    pub fn hmac_key(&self) -> &[u8] {
        &self.hmac_key
    }
}

impl fmt::Debug for DerivedKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKeySet")
            .field("key_len", &self.page_key.len())
            .finish_non_exhaustive()
    }
}

fn pbkdf2(hash: HashAlgorithm, password: &[u8], salt: &[u8], rounds: u32, out: &mut [u8]) {
    match hash {
        HashAlgorithm::Sha1 => pbkdf2_hmac::<Sha1>(password, salt, rounds, out),
        HashAlgorithm::Sha256 => pbkdf2_hmac::<Sha256>(password, salt, rounds, out),
        HashAlgorithm::Sha512 => pbkdf2_hmac::<Sha512>(password, salt, rounds, out),
    }
}

/// Derive the page key and HMAC key from raw key material and the container salt.
///
/// `raw_key` must be a valid AES key length (16, 24 or 32 bytes); the page
/// key has the same length, so it selects AES-128, AES-192 or AES-256.
pub fn derive_keys(
    raw_key: &[u8],
    salt: &[u8; SALT_SIZE],
    iterations: u32,
    hash: HashAlgorithm,
) -> Result<DerivedKeySet> {
    if !matches!(raw_key.len(), 16 | 24 | 32) {
        return Err(BakError::InvalidKey(format!(
            "raw key must be 16, 24 or 32 bytes, got {}",
            raw_key.len()
        )));
    }
    if iterations == 0 {
        return Err(BakError::InvalidParameters(
            "KDF iteration count must be at least 1".into(),
        ));
    }

    let mut page_key = Zeroizing::new(vec![0u8; raw_key.len()]);
    pbkdf2(hash, raw_key, salt, iterations, &mut page_key);

    let mut hmac_salt = *salt;
    for byte in &mut hmac_salt {
        *byte ^= HMAC_SALT_MASK;
    }

    let mut hmac_key = Zeroizing::new(vec![0u8; raw_key.len()]);
    pbkdf2(hash, &page_key, &hmac_salt, FAST_KDF_ITERATIONS, &mut hmac_key);

    tracing::trace!(%hash, iterations, key_len = raw_key.len(), "derived container keys");

    Ok(DerivedKeySet { page_key, hmac_key })
}
