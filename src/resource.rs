//! Resource reassembly from chunked BAK files.
//!
//! A media item is stored as one or more byte ranges, possibly spread over
//! several BAK files. Each range is independently AES-128-ECB encrypted; only
//! the last range of an item carries PKCS#7 padding.
//!
//! ## Flow
//!
//! 1. [`plan_groups`] groups ranges by key, orders each group and tags every
//!    range with its [`RangePosition`].
//! 2. [`Reassembler`] reads each range through a [`FileCache`], decrypts it
//!    and appends it to the group's buffer.
//! 3. The finished [`DecryptedBlob`] reports its sniffed format.

use crate::crypto::decrypt_chunk_in_place;
use crate::error::Result;
use crate::file_media::FileCache;
use crate::formats::{self, FileKind};
use crate::key::RawKey;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

pub use crate::crypto::RangePosition;

/// One encrypted byte range of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRange {
    pub source_file: PathBuf,
    pub offset: u64,
    pub length: usize,
    /// Identifies the resource this range belongs to.
    pub group_key: i64,
    /// Order of this range within its resource.
    pub sequence_index: i64,
}

/// A range with its padding decision attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRange {
    pub range: ResourceRange,
    pub position: RangePosition,
}

/// All ranges of one resource, in sequence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceGroup {
    pub key: i64,
    pub ranges: Vec<PlannedRange>,
}

impl ResourceGroup {
    /// Total ciphertext length of the group.
    pub fn encrypted_len(&self) -> usize {
        self.ranges.iter().map(|r| r.range.length).sum()
    }
}

/// Group ranges by key and fix each range's position.
///
/// Groups come out in ascending key order. Within a group, ranges are sorted
/// by `sequence_index` (stable for equal indices); the last one is the
/// [`GroupTerminal`](RangePosition::GroupTerminal).
pub fn plan_groups<I>(ranges: I) -> Vec<ResourceGroup>
where
    I: IntoIterator<Item = ResourceRange>,
{
    let mut by_key: BTreeMap<i64, Vec<ResourceRange>> = BTreeMap::new();
    for range in ranges {
        by_key.entry(range.group_key).or_default().push(range);
    }

    by_key
        .into_iter()
        .map(|(key, mut ranges)| {
            ranges.sort_by_key(|r| r.sequence_index);
            let last = ranges.len() - 1;
            let ranges = ranges
                .into_iter()
                .enumerate()
                .map(|(i, range)| PlannedRange {
                    range,
                    position: if i == last {
                        RangePosition::GroupTerminal
                    } else {
                        RangePosition::Interior
                    },
                })
                .collect();
            ResourceGroup { key, ranges }
        })
        .collect()
}

/// Plaintext of one reassembled resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedBlob {
    group_key: i64,
    data: Vec<u8>,
}

impl DecryptedBlob {
    pub fn new(group_key: i64, data: Vec<u8>) -> Self {
        Self { group_key, data }
    }

    pub fn group_key(&self) -> i64 {
        self.group_key
    }

    pub fn kind(&self) -> Option<FileKind> {
        formats::sniff(&self.data)
    }

    /// `".ext"` of the sniffed format, or `""`.
    pub fn extension(&self) -> &'static str {
        formats::extension(&self.data)
    }

    /// `<group key><ext>`, the name the blob is written under.
    pub fn file_name(&self) -> String {
        format!("{}{}", self.group_key, self.extension())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Reads, decrypts and concatenates resource groups.
pub struct Reassembler<'a, S = File> {
    key: &'a RawKey,
    cache: &'a mut FileCache<S>,
}

impl<'a, S: Read + Seek> Reassembler<'a, S> {
    pub fn new(key: &'a RawKey, cache: &'a mut FileCache<S>) -> Self {
        Self { key, cache }
    }

    /// Reassemble one group. Any failing range fails the whole group.
    pub fn reassemble_group(&mut self, group: &ResourceGroup) -> Result<DecryptedBlob> {
        let _span = tracing::debug_span!("group", key = group.key).entered();

        let mut data = Vec::with_capacity(group.encrypted_len());
        for planned in &group.ranges {
            let range = &planned.range;
            let mut chunk = self
                .cache
                .read_range(&range.source_file, range.offset, range.length)?;
            decrypt_chunk_in_place(self.key.chunk_key(), &mut chunk, planned.position)?;
            tracing::trace!(
                source = %range.source_file.display(),
                offset = range.offset,
                len = range.length,
                position = ?planned.position,
                "decrypted range"
            );
            data.extend_from_slice(&chunk);
        }

        tracing::debug!(ranges = group.ranges.len(), len = data.len(), "group reassembled");
        Ok(DecryptedBlob::new(group.key, data))
    }

    /// Reassemble groups one at a time and hand each blob to `f`.
    ///
    /// Only one blob is held in memory at a time. Stops at the first error
    /// from either reassembly or `f`; returns the number of blobs delivered.
    pub fn for_each_group<F>(&mut self, groups: &[ResourceGroup], mut f: F) -> Result<usize>
    where
        F: FnMut(DecryptedBlob) -> Result<()>,
    {
        let mut delivered = 0;
        for group in groups {
            f(self.reassemble_group(group)?)?;
            delivered += 1;
        }
        Ok(delivered)
    }
}

/// Reassemble every resource in `ranges`, keyed by group key.
///
/// The cache is emptied before returning, whether or not reassembly
/// succeeded.
pub fn reassemble<I, S>(
    ranges: I,
    key: &RawKey,
    cache: &mut FileCache<S>,
) -> Result<BTreeMap<i64, DecryptedBlob>>
where
    I: IntoIterator<Item = ResourceRange>,
    S: Read + Seek,
{
    let groups = plan_groups(ranges);
    let mut blobs = BTreeMap::new();
    let result = Reassembler::new(key, cache).for_each_group(&groups, |blob| {
        blobs.insert(blob.group_key(), blob);
        Ok(())
    });
    cache.drop_all();
    result.map(|_| blobs)
}

/// Reassemble groups on the rayon pool, one [`FileCache`] per worker.
#[cfg(feature = "parallel")]
pub fn reassemble_parallel<I>(ranges: I, key: &RawKey) -> Result<BTreeMap<i64, DecryptedBlob>>
where
    I: IntoIterator<Item = ResourceRange>,
{
    use rayon::prelude::*;

    let groups = plan_groups(ranges);
    tracing::debug!(groups = groups.len(), "reassembling in parallel");
    groups
        .par_iter()
        .map_init(FileCache::new, |cache, group| {
            Reassembler::new(key, cache).reassemble_group(group)
        })
        .map(|blob| blob.map(|b| (b.group_key(), b)))
        .collect()
}

/// Decrypt a whole standalone resource file with the chunk cipher.
///
/// The file is one interior chunk: no padding is removed.
pub fn decrypt_raw_file(path: &Path, key: &RawKey) -> Result<Vec<u8>> {
    let mut data = std::fs::read(path).map_err(|e| {
        std::io::Error::new(e.kind(), format!("{}: {}", path.display(), e))
    })?;
    decrypt_chunk_in_place(key.chunk_key(), &mut data, RangePosition::Interior)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encrypt_chunk;
    use crate::error::BakError;
    use std::io::{self, Cursor};

    fn key() -> RawKey {
        RawKey::from_hex("2b7e151628aed2a6abf7158809cf4f3c").unwrap()
    }

    fn range(file: &str, offset: u64, length: usize, group: i64, seq: i64) -> ResourceRange {
        ResourceRange {
            source_file: PathBuf::from(file),
            offset,
            length,
            group_key: group,
            sequence_index: seq,
        }
    }

    /// Two in-memory BAK files holding resource 7 split in three ranges
    /// (out of order on disk) and resource 3 in one range.
    fn fixture() -> (FileCache<Cursor<Vec<u8>>>, Vec<ResourceRange>, Vec<u8>, Vec<u8>) {
        let k = key();
        let pdf: Vec<u8> = b"%PDF-1.4\n"
            .iter()
            .copied()
            .chain((0..80u8).map(|b| b.wrapping_mul(3)))
            .collect();
        let part_a = encrypt_chunk(k.chunk_key(), &pdf[..32], RangePosition::Interior).unwrap();
        let part_b = encrypt_chunk(k.chunk_key(), &pdf[32..64], RangePosition::Interior).unwrap();
        let part_c =
            encrypt_chunk(k.chunk_key(), &pdf[64..], RangePosition::GroupTerminal).unwrap();

        let text = b"plain note".to_vec();
        let single = encrypt_chunk(k.chunk_key(), &text, RangePosition::GroupTerminal).unwrap();

        let mut bak0 = vec![0xEEu8; 5];
        let c_off = bak0.len() as u64;
        bak0.extend_from_slice(&part_c);
        let a_off = bak0.len() as u64;
        bak0.extend_from_slice(&part_a);

        let mut bak1 = Vec::new();
        bak1.extend_from_slice(&single);
        let b_off = bak1.len() as u64;
        bak1.extend_from_slice(&part_b);

        let ranges = vec![
            range("BAK_1", b_off, part_b.len(), 7, 32),
            range("BAK_0", c_off, part_c.len(), 7, 64),
            range("BAK_1", 0, single.len(), 3, 0),
            range("BAK_0", a_off, part_a.len(), 7, 0),
        ];

        let cache = FileCache::with_opener(move |path| match path.to_str() {
            Some("BAK_0") => Ok(Cursor::new(bak0.clone())),
            Some("BAK_1") => Ok(Cursor::new(bak1.clone())),
            _ => Err(io::Error::new(io::ErrorKind::NotFound, "missing")),
        });
        (cache, ranges, pdf, text)
    }

    #[test]
    fn test_plan_groups_positions() {
        let (_, ranges, _, _) = fixture();
        let groups = plan_groups(ranges);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, 3);
        assert_eq!(groups[0].ranges[0].position, RangePosition::GroupTerminal);

        let g = &groups[1];
        assert_eq!(g.key, 7);
        let seq: Vec<i64> = g.ranges.iter().map(|r| r.range.sequence_index).collect();
        assert_eq!(seq, vec![0, 32, 64]);
        let pos: Vec<RangePosition> = g.ranges.iter().map(|r| r.position).collect();
        assert_eq!(
            pos,
            vec![
                RangePosition::Interior,
                RangePosition::Interior,
                RangePosition::GroupTerminal
            ]
        );
    }

    #[test]
    fn test_plan_empty() {
        assert!(plan_groups(Vec::new()).is_empty());
    }

    #[test]
    fn test_reassemble_three_ranges() {
        let (mut cache, ranges, pdf, text) = fixture();
        let blobs = reassemble(ranges, &key(), &mut cache).unwrap();
        assert!(cache.is_empty());

        assert_eq!(blobs.len(), 2);
        let doc = &blobs[&7];
        assert_eq!(doc.as_bytes(), &pdf[..]);
        assert_eq!(doc.kind(), Some(FileKind::Pdf));
        assert_eq!(doc.file_name(), "7.pdf");

        let note = &blobs[&3];
        assert_eq!(note.as_bytes(), &text[..]);
        assert_eq!(note.extension(), "");
        assert_eq!(note.file_name(), "3");
    }

    #[test]
    fn test_for_each_group_streams_in_key_order() {
        let (mut cache, ranges, _, _) = fixture();
        let groups = plan_groups(ranges);
        let k = key();
        let mut seen = Vec::new();
        let n = Reassembler::new(&k, &mut cache)
            .for_each_group(&groups, |blob| {
                seen.push(blob.group_key());
                Ok(())
            })
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(seen, vec![3, 7]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_range_past_end_fails_group() {
        let (mut cache, mut ranges, _, _) = fixture();
        ranges[1].offset += 1000;
        let err = reassemble(ranges, &key(), &mut cache).unwrap_err();
        assert!(matches!(err, BakError::InvalidOffset { .. }));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_missing_source_names_path() {
        let (mut cache, mut ranges, _, _) = fixture();
        ranges[0].source_file = PathBuf::from("BAK_9");
        let err = reassemble(ranges, &key(), &mut cache).unwrap_err();
        assert!(err.to_string().contains("BAK_9"));
    }

    #[test]
    fn test_decrypt_raw_file_keeps_padding() {
        let k = key();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thumb");
        let ct = encrypt_chunk(k.chunk_key(), b"abc", RangePosition::GroupTerminal).unwrap();
        std::fs::write(&path, &ct).unwrap();

        let out = decrypt_raw_file(&path, &k).unwrap();
        assert_eq!(out.len(), 16);
        assert_eq!(&out[..3], b"abc");
        assert!(out[3..].iter().all(|&b| b == 13));
    }
}
