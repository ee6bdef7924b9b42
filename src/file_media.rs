//! FileCache - explicit cache of open byte sources keyed by path.
//!
//! Many resource ranges share a handful of BAK files, so each path is opened
//! once and reused. Handles are plain read-seek cursors and are not safe to
//! share between threads; give every worker its own cache.

use crate::error::{BakError, Result};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Interval for reading a byte range (inclusive end).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadInterval {
    pub start: u64,
    pub end: u64,
}

impl ReadInterval {
    /// Interval of `len` bytes starting at `start`; `None` when empty or overflowing.
    pub fn from_len(start: u64, len: u64) -> Option<Self> {
        if len == 0 {
            return None;
        }
        let end = start.checked_add(len)?.checked_sub(1)?;
        Some(Self { start, end })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

type Opener<S> = Box<dyn FnMut(&Path) -> io::Result<S> + Send>;

/// Open-handle cache. Handles stay open until [`drop_all`](Self::drop_all)
/// or until the cache is dropped.
pub struct FileCache<S = File> {
    opener: Opener<S>,
    handles: HashMap<PathBuf, S>,
}

impl FileCache<File> {
    /// Cache backed by the local filesystem.
    pub fn new() -> Self {
        Self::with_opener(|path| File::open(path))
    }
}

impl Default for FileCache<File> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for FileCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileCache")
            .field("open", &self.handles.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<S: Read + Seek> FileCache<S> {
    /// Cache over a custom byte source, e.g. in-memory cursors in tests.
    pub fn with_opener<F>(opener: F) -> Self
    where
        F: FnMut(&Path) -> io::Result<S> + Send + 'static,
    {
        Self {
            opener: Box::new(opener),
            handles: HashMap::new(),
        }
    }

    /// Get the handle for `path`, opening it on first use.
    pub fn open(&mut self, path: &Path) -> Result<&mut S> {
        match self.handles.entry(path.to_path_buf()) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(v) => {
                let handle = (self.opener)(path).map_err(|e| {
                    BakError::Io(io::Error::new(
                        e.kind(),
                        format!("{}: {}", path.display(), e),
                    ))
                })?;
                tracing::trace!(path = %path.display(), "opened source");
                Ok(v.insert(handle))
            }
        }
    }

    /// Total length of the source at `path`.
    pub fn source_len(&mut self, path: &Path) -> Result<u64> {
        let source = self.open(path)?;
        Ok(source.seek(SeekFrom::End(0))?)
    }

    /// Read exactly `len` bytes at `offset` from `path`.
    ///
    /// An empty range is rejected as
    /// [`InvalidParameters`](BakError::InvalidParameters). A range that extends past the end of the source is an
    /// [`InvalidOffset`](BakError::InvalidOffset); a source that delivers
    /// fewer bytes than it claims is a [`ShortRead`](BakError::ShortRead).
    pub fn read_range(&mut self, path: &Path, offset: u64, len: usize) -> Result<Vec<u8>> {
        if len == 0 {
            return Err(BakError::InvalidParameters(format!(
                "empty range at offset {offset} of {}",
                path.display()
            )));
        }
        let length = self.source_len(path)?;
        let interval = ReadInterval::from_len(offset, len as u64)
            .filter(|iv| iv.end < length)
            .ok_or_else(|| BakError::InvalidOffset {
                path: path.to_path_buf(),
                start: offset,
                end: offset.saturating_add(len as u64).saturating_sub(1),
                length,
            })?;

        let source = self.open(path)?;
        source.seek(SeekFrom::Start(interval.start))?;
        let mut buffer = Vec::with_capacity(len);
        let got = source.take(interval.len()).read_to_end(&mut buffer)?;
        if got != len {
            return Err(BakError::ShortRead {
                path: path.to_path_buf(),
                offset,
                expected: len,
                got,
            });
        }
        Ok(buffer)
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Close every cached handle.
    pub fn drop_all(&mut self) {
        if !self.handles.is_empty() {
            tracing::debug!(count = self.handles.len(), "releasing cached handles");
        }
        self.handles.clear();
    }
}
