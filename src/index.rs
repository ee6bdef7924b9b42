//! Read-only access to a decrypted backup database.
//!
//! Tables read:
//!
//! | Table | Used for |
//! |-------|----------|
//! | `MsgFileSegment` | where each chunk of a media item lives |
//! | `MsgMedia` | string media id to numeric map key |
//! | `Session` | conversations, largest first |
//! | `Name2ID` | user name to talker id |
//! | `MsgSegments` | encrypted message blocks of one talker |

use crate::error::{BakError, Result};
use crate::resource::ResourceRange;
use rusqlite::{params, Connection, OpenFlags, Row};
use std::path::Path;

/// One row of `MsgFileSegment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSegment {
    /// Media item the chunk belongs to.
    pub map_key: i64,
    /// Position of the chunk inside the media item.
    pub inner_offset: i64,
    pub length: i64,
    pub total_len: i64,
    /// Offset of the chunk inside its BAK file.
    pub offset: i64,
    /// BAK file name, relative to the resource directory.
    pub file_name: String,
}

impl FileSegment {
    const COLUMNS: &'static str = "MapKey, InnerOffset, Length, TotalLen, OffSet, FileName";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            map_key: row.get(0)?,
            inner_offset: row.get(1)?,
            length: row.get(2)?,
            total_len: row.get(3)?,
            offset: row.get(4)?,
            file_name: row.get(5)?,
        })
    }

    /// Resource range for this chunk, with its BAK file under `resource_dir`.
    ///
    /// A negative offset or length is an
    /// [`InvalidParameters`](BakError::InvalidParameters) error.
    pub fn to_range(&self, resource_dir: &Path) -> Result<ResourceRange> {
        let (offset, length) = checked_extent(self.offset, self.length, || {
            format!("file segment {}@{}", self.map_key, self.inner_offset)
        })?;
        Ok(ResourceRange {
            source_file: resource_dir.join(&self.file_name),
            offset,
            length,
            group_key: self.map_key,
            sequence_index: self.inner_offset,
        })
    }
}

/// One row of `Session`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// User name of the other party (or the group).
    pub talker: String,
    pub nick_name: String,
    pub start_time: i64,
    pub end_time: i64,
    /// Bytes of message data held for this session.
    pub total_size: i64,
}

impl Session {
    const COLUMNS: &'static str = "Talker, NickName, StartTime, EndTime, TotalSize";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            talker: row.get(0)?,
            nick_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            start_time: row.get(2)?,
            end_time: row.get(3)?,
            total_size: row.get(4)?,
        })
    }
}

/// One row of `MsgSegments`: an encrypted block of messages in a BAK file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgSegment {
    pub talker_id: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub offset: i64,
    pub length: i64,
    pub usr_name: String,
    pub status: i64,
    /// BAK file path, relative to the resource directory.
    pub file_path: String,
    pub segment_id: String,
}

impl MsgSegment {
    const COLUMNS: &'static str =
        "TalkerId, StartTime, EndTime, OffSet, Length, UsrName, Status, FilePath, SegmentId";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            talker_id: row.get(0)?,
            start_time: row.get(1)?,
            end_time: row.get(2)?,
            offset: row.get(3)?,
            length: row.get(4)?,
            usr_name: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            status: row.get::<_, Option<i64>>(6)?.unwrap_or_default(),
            file_path: row.get(7)?,
            segment_id: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        })
    }

    /// Resource range for this block under `resource_dir`.
    ///
    /// Every message block is a resource of its own, so the range is the only
    /// member of group `group_key` and always has its padding removed.
    pub fn to_range(&self, resource_dir: &Path, group_key: i64) -> Result<ResourceRange> {
        let (offset, length) = checked_extent(self.offset, self.length, || {
            format!("message segment {:?} of talker {}", self.segment_id, self.talker_id)
        })?;
        Ok(ResourceRange {
            source_file: resource_dir.join(&self.file_path),
            offset,
            length,
            group_key,
            sequence_index: 0,
        })
    }
}

/// Convert a row's signed offset and length, rejecting negative values.
fn checked_extent(offset: i64, length: i64, what: impl Fn() -> String) -> Result<(u64, usize)> {
    let offset = u64::try_from(offset)
        .map_err(|_| BakError::InvalidParameters(format!("{}: negative offset {offset}", what())))?;
    let length = usize::try_from(length)
        .map_err(|_| BakError::InvalidParameters(format!("{}: negative length {length}", what())))?;
    Ok((offset, length))
}

/// Handle on a decrypted backup database.
pub struct BackupIndex {
    conn: Connection,
}

impl BackupIndex {
    /// Open `path` read-only.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        tracing::debug!(path = %path.display(), "opened backup index");
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Every file segment, ordered by media item then position.
    pub fn file_segments(&self) -> Result<Vec<FileSegment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM MsgFileSegment ORDER BY MapKey, InnerOffset",
            FileSegment::COLUMNS
        ))?;
        let rows = stmt
            .query_map([], FileSegment::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// File segments of one media item, in position order.
    pub fn file_segments_for(&self, map_key: i64) -> Result<Vec<FileSegment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM MsgFileSegment WHERE MapKey = ? ORDER BY InnerOffset",
            FileSegment::COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![map_key], FileSegment::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Numeric media id for a string media id, if the media is known.
    pub fn media_id(&self, media_id_str: &str) -> Result<Option<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT MediaId FROM MsgMedia WHERE MediaIdStr = ?")?;
        let result = stmt.query_row(params![media_id_str], |row| row.get(0));
        match result {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every resource range, with BAK files resolved under `resource_dir`.
    pub fn resource_ranges(&self, resource_dir: &Path) -> Result<Vec<ResourceRange>> {
        self.file_segments()?
            .iter()
            .map(|segment| segment.to_range(resource_dir))
            .collect()
    }

    /// Resource ranges of one media item.
    pub fn media_ranges(&self, map_key: i64, resource_dir: &Path) -> Result<Vec<ResourceRange>> {
        self.file_segments_for(map_key)?
            .iter()
            .map(|segment| segment.to_range(resource_dir))
            .collect()
    }

    /// Every session, largest total size first.
    pub fn sessions(&self) -> Result<Vec<Session>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM Session ORDER BY TotalSize DESC",
            Session::COLUMNS
        ))?;
        let rows = stmt
            .query_map([], Session::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Talker id of `usr_name`: its 1-based row position in `Name2ID`.
    pub fn talker_id(&self, usr_name: &str) -> Result<Option<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT UsrName FROM Name2ID ORDER BY rowid")?;
        let mut rows = stmt.query([])?;
        let mut position = 0i64;
        while let Some(row) = rows.next()? {
            position += 1;
            let name: Option<String> = row.get(0)?;
            if name.as_deref() == Some(usr_name) {
                return Ok(Some(position));
            }
        }
        Ok(None)
    }

    /// Message blocks of one talker, oldest first.
    pub fn msg_segments(&self, talker_id: i64) -> Result<Vec<MsgSegment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM MsgSegments WHERE TalkerId = ? ORDER BY StartTime, rowid",
            MsgSegment::COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![talker_id], MsgSegment::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// One single-range group per message block of `talker_id`, keyed by the
    /// block's position in [`msg_segments`](Self::msg_segments).
    pub fn message_ranges(
        &self,
        talker_id: i64,
        resource_dir: &Path,
    ) -> Result<Vec<ResourceRange>> {
        self.msg_segments(talker_id)?
            .iter()
            .zip(0i64..)
            .map(|(segment, key)| segment.to_range(resource_dir, key))
            .collect()
    }
}
