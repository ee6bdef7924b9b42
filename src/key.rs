//! Raw key validation.
//!
//! The operator supplies a 32-character hex string. It is validated before
//! any key derivation happens and held only for the duration of one command.

use crate::error::{BakError, Result};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Number of hex characters in a raw key.
pub const RAW_KEY_HEX_LEN: usize = 32;

/// How the validated hex string is turned into key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyEncoding {
    /// The 16 bytes obtained by hex-decoding the string.
    #[default]
    Hex,
    /// The 32 ASCII bytes of the string as typed.
    ///
    /// This is what the backup tool shipped with the application feeds into
    /// PBKDF2, giving an AES-256 page key.
    Ascii,
}

/// Validated key material.
///
/// Zeroized on drop. `Debug` never prints the key bytes.
#[derive(Clone)]
pub struct RawKey {
    bytes: Zeroizing<Vec<u8>>,
    encoding: KeyEncoding,
}

impl RawKey {
    /// Parse a 32-character hex string as 16 bytes of key material.
    pub fn from_hex(s: &str) -> Result<Self> {
        Self::parse(s, KeyEncoding::Hex)
    }

    /// Validate `s` and build key material with the requested encoding.
    ///
    /// `s` is taken verbatim; surrounding whitespace makes it invalid.
    pub fn parse(s: &str, encoding: KeyEncoding) -> Result<Self> {
        if s.len() != RAW_KEY_HEX_LEN {
            return Err(BakError::InvalidKey(format!(
                "expected {} hex characters, got {}",
                RAW_KEY_HEX_LEN,
                s.len()
            )));
        }
        let decoded = Zeroizing::new(
            hex::decode(s).map_err(|e| BakError::InvalidKey(format!("not hex: {e}")))?,
        );

        let bytes = match encoding {
            KeyEncoding::Hex => decoded,
            KeyEncoding::Ascii => Zeroizing::new(s.as_bytes().to_vec()),
        };

        Ok(Self { bytes, encoding })
    }

    /// Wrap already-decoded key bytes.
    ///
    /// Accepts any AES key size (16, 24 or 32 bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if !matches!(bytes.len(), 16 | 24 | 32) {
            return Err(BakError::InvalidKey(format!(
                "key material must be 16, 24 or 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            bytes: Zeroizing::new(bytes.to_vec()),
            encoding: KeyEncoding::Hex,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn encoding(&self) -> KeyEncoding {
        self.encoding
    }

    /// First 16 bytes, the AES-128 key used for resource chunks.
    pub fn chunk_key(&self) -> &[u8] {
        &self.bytes[..16]
    }
}

impl FromStr for RawKey {
    type Err = BakError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for RawKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawKey")
            .field("len", &self.bytes.len())
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}
