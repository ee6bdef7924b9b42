//! AES-128-ECB chunk cipher for resource files.
//!
//! Resource chunks carry no IV and no per-chunk salt. Only the first 16 bytes
//! of the raw key material are used. PKCS#7 padding exists only at the end of
//! a logical resource, so unpadding is driven by [`RangePosition`].

use super::BLOCK_SIZE;
use crate::error::{BakError, Result};
use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

/// Where a chunk sits inside its logical resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangePosition {
    /// Followed by more chunks of the same resource; never padded.
    Interior,
    /// Last chunk of the resource; may end in PKCS#7 padding.
    GroupTerminal,
}

impl RangePosition {
    pub fn removes_padding(self) -> bool {
        matches!(self, Self::GroupTerminal)
    }
}

fn chunk_cipher(key: &[u8]) -> Result<Aes128> {
    let key = key.get(..16).ok_or_else(|| {
        BakError::InvalidKey(format!(
            "chunk key needs at least 16 bytes, got {}",
            key.len()
        ))
    })?;
    Aes128::new_from_slice(key).map_err(|_| BakError::InvalidKey("bad chunk key".into()))
}

/// Remove trailing PKCS#7 padding if present.
///
/// Returns `false` and leaves `buf` untouched when the trailing bytes do not
/// form a valid pad (last byte `p` in `1..=16`, the last `p` bytes all `p`).
pub fn strip_pkcs7(buf: &mut Vec<u8>) -> bool {
    let Some(&pad) = buf.last() else {
        return false;
    };
    let pad_len = pad as usize;
    if pad_len == 0 || pad_len > BLOCK_SIZE || pad_len > buf.len() {
        return false;
    }
    if !buf[buf.len() - pad_len..].iter().all(|&b| b == pad) {
        return false;
    }
    buf.truncate(buf.len() - pad_len);
    true
}

/// Decrypt a chunk in place, unpadding it when it ends its resource.
pub fn decrypt_chunk_in_place(
    key: &[u8],
    buf: &mut Vec<u8>,
    position: RangePosition,
) -> Result<()> {
    if buf.len() % BLOCK_SIZE != 0 {
        return Err(BakError::UnalignedChunk(buf.len()));
    }

    let cipher = chunk_cipher(key)?;
    for block in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }

    if position.removes_padding() && !strip_pkcs7(buf) {
        // Tolerated: some terminal chunks are stored without padding.
        tracing::debug!(
            len = buf.len(),
            last = ?buf.last(),
            "terminal chunk has no valid PKCS#7 padding, kept as is"
        );
    }
    Ok(())
}

/// Decrypt a chunk into a new buffer.
pub fn decrypt_chunk(key: &[u8], ciphertext: &[u8], position: RangePosition) -> Result<Vec<u8>> {
    let mut buf = ciphertext.to_vec();
    decrypt_chunk_in_place(key, &mut buf, position)?;
    Ok(buf)
}

/// Encrypt a chunk; `GroupTerminal` chunks are PKCS#7 padded first.
///
/// `Interior` plaintext must already be block aligned.
pub fn encrypt_chunk(key: &[u8], plaintext: &[u8], position: RangePosition) -> Result<Vec<u8>> {
    let mut buf = plaintext.to_vec();
    if position.removes_padding() {
        let pad = BLOCK_SIZE - buf.len() % BLOCK_SIZE;
        buf.resize(buf.len() + pad, pad as u8);
    } else if buf.len() % BLOCK_SIZE != 0 {
        return Err(BakError::UnalignedChunk(buf.len()));
    }

    let cipher = chunk_cipher(key)?;
    for block in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(buf)
}
