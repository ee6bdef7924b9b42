//! Chat backup decryption library.
//!
//! Recovers plaintext from a messaging application's backup:
//! - the encrypted database container (SQLCipher-style pages, AES-CBC with a
//!   per-page HMAC) is turned back into a plain SQLite file;
//! - media resources, stored as AES-128-ECB chunks scattered over BAK files,
//!   are reassembled into whole files and tagged with a sniffed extension.
//!
//! ## Features
//! - `sqlite` - read resource locations, sessions and message blocks from the
//!   decrypted database
//! - `parallel` - reassemble resources on a rayon pool
//! - `cli` - the `chatbak` binary (default)
//!
//! ## Example
//!
//! ```rust,ignore
//! use chatbak::{decode_file, ContainerParams, RawKey};
//!
//! let key = RawKey::from_hex("00112233445566778899aabbccddeeff")?;
//! let summary = decode_file("Backup.db".as_ref(), "plain.db".as_ref(), &key, ContainerParams::default())?;
//! println!("{} pages", summary.pages);
//! ```

pub mod container;
pub mod crypto;
pub mod error;
mod file_media;
pub mod formats;
#[cfg(feature = "sqlite")]
pub mod index;
pub mod key;
pub mod resource;

pub use container::{
    decode_file, encode_container, ContainerDecoder, ContainerParams, DecodeSummary,
    DEFAULT_KDF_ITERATIONS, DEFAULT_PAGE_SIZE, SQLITE_HEADER,
};
pub use crypto::{derive_keys, DerivedKeySet, HashAlgorithm, PageCipher};
pub use error::{BakError, ErrorKind, Result};
pub use file_media::{FileCache, ReadInterval};
pub use formats::{extension, sniff, FileKind};
pub use key::{KeyEncoding, RawKey};
pub use resource::{
    decrypt_raw_file, plan_groups, reassemble, DecryptedBlob, PlannedRange, RangePosition,
    Reassembler, ResourceGroup, ResourceRange,
};

#[cfg(feature = "parallel")]
pub use resource::reassemble_parallel;

#[cfg(feature = "sqlite")]
pub use index::{BackupIndex, FileSegment, MsgSegment, Session};
