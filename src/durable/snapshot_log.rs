//! Append-only snapshot table.
//!
//! Entries are framed as `[len u32][msgpack entry][crc32]` after a fixed
//! header. A deletion is itself an appended entry; the log is rewritten
//! without dead entries once they outnumber the live records.
//!
//! A frame cut short at the end of the file is truncated on open. A complete
//! frame that fails its checksum or does not decode is skipped and counted as
//! dead; replay continues past it.

use crate::error::{Result, SafeError};
use crate::types::{
    Direction, SnapshotId, SnapshotKey, SnapshotMeta, SnapshotReason, SnapshotRecord, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the snapshot log.
const LOG_MAGIC: &[u8; 4] = b"SNP\0";

/// Current log format version.
pub const LOG_VERSION: u8 = 1;

/// magic + version + id floor
const HEADER_SIZE: u64 = 4 + 1 + 8;

/// Sanity bound on a single frame.
const MAX_ENTRY_BYTES: usize = 256 * 1024 * 1024;

/// Dead entries tolerated before compaction is considered at all.
const COMPACTION_FLOOR: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
enum LogEntry {
    Put(SnapshotRecord),
    Delete(SnapshotId),
}

/// One frame as found on disk.
enum Frame {
    Entry(LogEntry),
    /// Complete on disk but unreadable.
    Damaged(SafeError),
}

/// Writes that can be made to fail on an open log.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FailPoints {
    pub append: bool,
    pub delete: bool,
}

/// Borrowing twin of `LogEntry`; encodes identically.
#[derive(Serialize)]
enum LogEntryRef<'a> {
    Put(&'a SnapshotRecord),
    Delete(SnapshotId),
}

/// In-memory index entry for a live record.
#[derive(Clone, Debug)]
struct IndexEntry {
    ts: Timestamp,
    offset: u64,
    reason: SnapshotReason,
    bytes: u64,
}

/// Append-only snapshot table with a `ts` index.
pub struct SnapshotLog {
    path: PathBuf,
    file: File,
    file_size: u64,
    next_id: SnapshotId,
    by_ts: BTreeSet<SnapshotKey>,
    by_id: HashMap<SnapshotId, IndexEntry>,
    /// Frames that no longer describe a live record.
    dead_entries: usize,
    fail_points: FailPoints,
}

impl SnapshotLog {
    /// Open or create the snapshot table.
    ///
    /// A torn tail is truncated and damaged frames are skipped; every intact
    /// frame is kept. A file too short to hold a header is recreated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let existing = match fs::metadata(&path) {
            Ok(meta) => Some(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        match existing {
            None => Self::create(&path)?,
            Some(len) if len < HEADER_SIZE => {
                let bytes = fs::read(&path)?;
                let n = bytes.len().min(LOG_MAGIC.len());
                if bytes[..n] != LOG_MAGIC[..n] {
                    return Err(SafeError::InvalidFormat("Invalid snapshot log magic".into()));
                }
                tracing::warn!(
                    path = %path.display(),
                    bytes = len,
                    "recreating snapshot log with an incomplete header"
                );
                Self::create(&path)?;
            }
            Some(_) => {}
        }

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let id_floor = Self::read_header(&mut file)?;

        let mut log = Self {
            path,
            file,
            file_size: HEADER_SIZE,
            next_id: id_floor,
            by_ts: BTreeSet::new(),
            by_id: HashMap::new(),
            dead_entries: 0,
            fail_points: FailPoints::default(),
        };
        log.replay()?;

        Ok(log)
    }

    /// Append a record, assigning the next id.
    pub fn append(
        &mut self,
        ts: Timestamp,
        reason: SnapshotReason,
        data: String,
    ) -> Result<SnapshotRecord> {
        if self.fail_points.append {
            return Err(injected("append"));
        }

        let record = SnapshotRecord {
            id: self.next_id,
            ts,
            reason,
            bytes: data.len() as u64,
            data,
        };

        let offset = self.write_frame(&LogEntryRef::Put(&record))?;
        self.file.sync_data()?;

        self.next_id = record.id.next();
        self.index_put(&record, offset);

        Ok(record)
    }

    /// Delete records by primary key. Unknown ids are ignored.
    ///
    /// Returns how many records were removed.
    pub fn delete_many(&mut self, ids: &[SnapshotId]) -> Result<usize> {
        if self.fail_points.delete {
            return Err(injected("delete"));
        }

        let mut removed = 0;
        for &id in ids {
            if !self.by_id.contains_key(&id) {
                continue;
            }
            self.write_frame(&LogEntryRef::Delete(id))?;
            self.index_delete(id);
            removed += 1;
        }

        if removed > 0 {
            self.file.sync_data()?;
            if self.needs_compaction() {
                self.compact()?;
            }
        }

        Ok(removed)
    }

    /// Read a full record.
    pub fn get(&mut self, id: SnapshotId) -> Result<Option<SnapshotRecord>> {
        let Some(offset) = self.by_id.get(&id).map(|e| e.offset) else {
            return Ok(None);
        };

        match self.read_at(offset)? {
            LogEntry::Put(record) if record.id == id => Ok(Some(record)),
            _ => Err(SafeError::Corruption(format!(
                "index points at a foreign entry for snapshot {id}"
            ))),
        }
    }

    /// Metadata for a live record.
    pub fn meta(&self, id: SnapshotId) -> Option<SnapshotMeta> {
        self.by_id.get(&id).map(|e| SnapshotMeta {
            id,
            ts: e.ts,
            reason: e.reason.clone(),
            bytes: e.bytes,
        })
    }

    /// Live keys ordered by `ts` in the given direction.
    pub fn keys(&self, direction: Direction) -> Vec<SnapshotKey> {
        match direction {
            Direction::Next => self.by_ts.iter().copied().collect(),
            Direction::Prev => self.by_ts.iter().rev().copied().collect(),
        }
    }

    /// Key with the greatest `ts`.
    pub fn newest(&self) -> Option<SnapshotKey> {
        self.by_ts.iter().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Id the next append will receive.
    pub fn next_id(&self) -> SnapshotId {
        self.next_id
    }

    /// Current file size in bytes.
    pub fn size(&self) -> u64 {
        self.file_size
    }

    #[cfg(test)]
    pub(crate) fn set_fail_points(&mut self, points: FailPoints) {
        self.fail_points = points;
    }

    fn needs_compaction(&self) -> bool {
        self.dead_entries > COMPACTION_FLOOR && self.dead_entries > self.by_id.len()
    }

    /// Rewrite the log with live records only.
    pub fn compact(&mut self) -> Result<()> {
        let tmp_path = self.path.with_extension("log.compact");
        let mut out = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        Self::write_header(&mut out, self.next_id)?;

        let mut new_offsets = Vec::with_capacity(self.by_id.len());
        let mut position = HEADER_SIZE;
        for key in self.keys(Direction::Next) {
            let Some(record) = self.get(key.id)? else {
                continue;
            };
            let encoded = rmp_serde::to_vec(&LogEntryRef::Put(&record))?;
            Self::write_encoded(&mut out, &encoded)?;
            new_offsets.push((key.id, position));
            position += 4 + encoded.len() as u64 + 4;
        }
        out.sync_all()?;
        drop(out);

        fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.file_size = position;
        for (id, offset) in new_offsets {
            if let Some(entry) = self.by_id.get_mut(&id) {
                entry.offset = offset;
            }
        }

        tracing::debug!(
            live = self.by_id.len(),
            dropped = self.dead_entries,
            "compacted snapshot log"
        );
        self.dead_entries = 0;

        Ok(())
    }

    fn index_put(&mut self, record: &SnapshotRecord, offset: u64) {
        if let Some(previous) = self.by_id.insert(
            record.id,
            IndexEntry {
                ts: record.ts,
                offset,
                reason: record.reason.clone(),
                bytes: record.bytes,
            },
        ) {
            self.by_ts.remove(&SnapshotKey { ts: previous.ts, id: record.id });
            self.dead_entries += 1;
        }
        self.by_ts.insert(SnapshotKey { ts: record.ts, id: record.id });
    }

    fn index_delete(&mut self, id: SnapshotId) {
        if let Some(entry) = self.by_id.remove(&id) {
            self.by_ts.remove(&SnapshotKey { ts: entry.ts, id });
            // the Put and the Delete frame are both dead now
            self.dead_entries += 2;
        } else {
            self.dead_entries += 1;
        }
    }

    /// Rebuild the index from disk.
    ///
    /// Stops at the first incomplete frame and truncates from there.
    fn replay(&mut self) -> Result<()> {
        let total = self.file.metadata()?.len();
        self.file.seek(SeekFrom::Start(HEADER_SIZE))?;

        let mut entries = Vec::new();
        let mut damaged = 0;
        let mut good_end = HEADER_SIZE;
        let mut torn = None;
        {
            let mut reader = BufReader::new(&mut self.file);
            loop {
                match Self::read_frame(&mut reader) {
                    Ok(Some((Frame::Entry(entry), frame_len))) => {
                        entries.push((entry, good_end));
                        good_end += frame_len;
                    }
                    Ok(Some((Frame::Damaged(e), frame_len))) => {
                        tracing::warn!(
                            path = %self.path.display(),
                            offset = good_end,
                            error = %e,
                            "skipping damaged snapshot frame"
                        );
                        damaged += 1;
                        good_end += frame_len;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        torn = Some(e);
                        break;
                    }
                }
            }
        }

        if let Some(e) = torn {
            tracing::warn!(
                path = %self.path.display(),
                kept_bytes = good_end,
                dropped_bytes = total.saturating_sub(good_end),
                error = %e,
                "truncating damaged snapshot log tail"
            );
            self.file.set_len(good_end)?;
            self.file.sync_all()?;
        }
        self.file_size = good_end;

        for (entry, offset) in entries {
            match entry {
                LogEntry::Put(record) => {
                    if record.id >= self.next_id {
                        self.next_id = record.id.next();
                    }
                    self.index_put(&record, offset);
                }
                LogEntry::Delete(id) => self.index_delete(id),
            }
        }
        self.dead_entries += damaged;

        Ok(())
    }

    /// Write a fresh header-only log in one rename.
    fn create(path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("log.tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            Self::write_header(&mut file, SnapshotId(1))?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn write_header(file: &mut File, id_floor: SnapshotId) -> Result<()> {
        file.seek(SeekFrom::Start(0))?;
        file.write_all(LOG_MAGIC)?;
        file.write_all(&[LOG_VERSION])?;
        file.write_all(&id_floor.0.to_le_bytes())?;
        Ok(())
    }

    fn read_header(file: &mut File) -> Result<SnapshotId> {
        file.seek(SeekFrom::Start(0))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != LOG_MAGIC {
            return Err(SafeError::InvalidFormat("Invalid snapshot log magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] > LOG_VERSION {
            return Err(SafeError::VersionConflict {
                found: version[0],
                supported: LOG_VERSION,
            });
        }
        if version[0] != LOG_VERSION {
            return Err(SafeError::InvalidFormat(format!(
                "Unsupported snapshot log version: {}",
                version[0]
            )));
        }

        let mut floor = [0u8; 8];
        file.read_exact(&mut floor)?;
        Ok(SnapshotId(u64::from_le_bytes(floor).max(1)))
    }

    /// Append one frame at the end of the file, returning its offset.
    fn write_frame(&mut self, entry: &LogEntryRef<'_>) -> Result<u64> {
        let encoded = rmp_serde::to_vec(entry)?;
        if encoded.len() > MAX_ENTRY_BYTES {
            return Err(SafeError::Serialization(format!(
                "snapshot entry of {} bytes exceeds frame limit",
                encoded.len()
            )));
        }

        let offset = self.file_size;
        self.file.seek(SeekFrom::Start(offset))?;
        Self::write_encoded(&mut self.file, &encoded)?;
        self.file_size = offset + 4 + encoded.len() as u64 + 4;

        Ok(offset)
    }

    fn write_encoded(file: &mut File, encoded: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(encoded.len() + 8);
        frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        frame.extend_from_slice(encoded);
        frame.extend_from_slice(&crc32fast::hash(encoded).to_le_bytes());
        file.write_all(&frame)?;
        Ok(())
    }

    fn read_at(&mut self, offset: u64) -> Result<LogEntry> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&mut self.file);
        match Self::read_frame(&mut reader)? {
            Some((Frame::Entry(entry), _)) => Ok(entry),
            Some((Frame::Damaged(e), _)) => Err(e),
            None => Err(SafeError::Corruption(format!("no entry at offset {offset}"))),
        }
    }

    /// Read one frame. `Ok(None)` at a clean end of file; `Err` when the
    /// frame is cut short or its length is implausible.
    fn read_frame<R: BufRead>(reader: &mut R) -> Result<Option<(Frame, u64)>> {
        if reader.fill_buf()?.is_empty() {
            return Ok(None);
        }

        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_ENTRY_BYTES {
            return Err(SafeError::Corruption("snapshot entry too large".into()));
        }

        let mut encoded = vec![0u8; len];
        reader.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let expected = u32::from_le_bytes(checksum_bytes);
        let got = crc32fast::hash(&encoded);
        let frame_len = 4 + len as u64 + 4;
        if expected != got {
            let e = SafeError::ChecksumMismatch { expected, got };
            return Ok(Some((Frame::Damaged(e), frame_len)));
        }

        let frame = match rmp_serde::from_slice(&encoded) {
            Ok(entry) => Frame::Entry(entry),
            Err(e) => Frame::Damaged(e.into()),
        };
        Ok(Some((frame, frame_len)))
    }
}

fn injected(op: &str) -> SafeError {
    SafeError::Io(io::Error::new(
        io::ErrorKind::Other,
        format!("snapshot {op} disabled"),
    ))
}
