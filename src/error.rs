//! Error types for container decoding and resource reassembly.
//!
//! This module provides the [`BakError`] type which covers every failure that
//! can occur while validating keys, decoding container pages, or reading and
//! decrypting resource chunks.
//!
//! ## Error Categories
//!
//! | Category | Errors | Description |
//! |----------|--------|-------------|
//! | Key | [`InvalidKey`] | Raw key is not 32 hex characters |
//! | Authentication | [`Authentication`] | A page HMAC did not match |
//! | I/O | [`Io`], [`ShortRead`] | Unreadable path, truncated source, unwritable sink |
//! | Format | [`UnalignedChunk`], [`InvalidOffset`], [`InvalidParameters`] | Malformed layout or arguments |
//!
//! Every error is fatal for the operation that raised it. Nothing in this
//! crate retries or continues past a failure.
//!
//! ## Example
//!
//! ```rust,ignore
//! use chatbak::{BakError, ErrorKind};
//!
//! match decoder.decode_to(&mut out) {
//!     Ok(summary) => println!("decoded {} pages", summary.pages),
//!     Err(e) if e.kind() == ErrorKind::Authentication => eprintln!("wrong key: {e}"),
//!     Err(e) => eprintln!("error: {e}"),
//! }
//! ```
//!
//! [`InvalidKey`]: BakError::InvalidKey
//! [`Authentication`]: BakError::Authentication
//! [`Io`]: BakError::Io
//! [`ShortRead`]: BakError::ShortRead
//! [`UnalignedChunk`]: BakError::UnalignedChunk
//! [`InvalidOffset`]: BakError::InvalidOffset
//! [`InvalidParameters`]: BakError::InvalidParameters

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Error type for backup decryption operations.
#[derive(Debug, Error)]
pub enum BakError {
    /// The raw key failed validation.
    ///
    /// Keys must be exactly 32 hexadecimal characters. The message never
    /// contains the key itself.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A container page failed HMAC verification.
    ///
    /// Usually a wrong key or wrong KDF parameters; otherwise the container is
    /// corrupt. The whole decode is aborted.
    #[error("page {page} failed authentication (wrong key or corrupt container)")]
    Authentication {
        /// 1-based page number.
        page: u32,
    },

    /// Fewer bytes were available than a page or range required.
    #[error("short read from {path}: expected {expected} bytes at offset {offset}, got {got}")]
    ShortRead {
        /// Source the read was issued against.
        path: PathBuf,
        /// Byte offset of the read.
        offset: u64,
        /// Bytes requested.
        expected: usize,
        /// Bytes actually read.
        got: usize,
    },

    /// A requested byte range lies beyond the end of its source.
    #[error("range {start}..={end} is outside {path} (length {length})")]
    InvalidOffset {
        /// Source the range refers to.
        path: PathBuf,
        /// First byte of the range.
        start: u64,
        /// Last byte of the range (inclusive).
        end: u64,
        /// Length of the source.
        length: u64,
    },

    /// Chunk ciphertext is not a whole number of AES blocks.
    #[error("chunk length {0} is not a multiple of the 16-byte block size")]
    UnalignedChunk(usize),

    /// Container parameters or page geometry are unusable.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The backup index could not be queried.
    #[cfg(feature = "sqlite")]
    #[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
    #[error("index query failed: {0}")]
    Index(#[from] rusqlite::Error),
}

/// Coarse classification of a [`BakError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Key validation failed before any derivation.
    InvalidKey,
    /// A page tag mismatch.
    Authentication,
    /// Reading or writing failed.
    Io,
    /// Layout or parameter violation.
    Format,
    /// Index façade failure.
    Index,
}

impl BakError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidKey(_) => ErrorKind::InvalidKey,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::ShortRead { .. } | Self::Io(_) => ErrorKind::Io,
            Self::UnalignedChunk(_) | Self::InvalidOffset { .. } | Self::InvalidParameters(_) => {
                ErrorKind::Format
            }
            #[cfg(feature = "sqlite")]
            Self::Index(_) => ErrorKind::Index,
        }
    }
}

pub type Result<T> = std::result::Result<T, BakError>;
