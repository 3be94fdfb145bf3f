//! Write-ahead log of committed passes.
//!
//! Each resolver pass is appended as one frame before it is published, so a
//! pass is either entirely in the log or not at all.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [FRAME 1: codec-encoded WalEntry]
//! [FRAME 2: codec-encoded WalEntry]
//! ...
//! ```
//!
//! A frame cut short by a crash can only be the last one. It is dropped on
//! open; damage anywhere else is reported as corruption.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::codec;
use crate::storage::PassCommit;

/// A single pass as read back from the log.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number, never reset by truncation.
    pub sequence: u64,
    /// When the frame was written.
    pub written_at: DateTime<Utc>,
    /// The pass.
    pub commit: PassCommit,
}

#[derive(Serialize)]
struct WalFrame<'a> {
    sequence: u64,
    written_at: DateTime<Utc>,
    commit: &'a PassCommit,
}

#[derive(Debug)]
struct WalWriter {
    file: File,
    sequence: u64,
    len: u64,
}

/// Append-only log of passes. Thread-safe via an internal mutex.
#[derive(Debug)]
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_on_write: bool,
}

fn poisoned() -> IoError {
    IoError::new(ErrorKind::Other, "poisoned lock: wal.writer")
}

impl WriteAheadLog {
    /// Opens or creates the log at `path`, dropping a torn final frame.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::InvalidData`] if a frame other than the last
    /// one is damaged.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let (sequence, len) = if file.metadata()?.len() < codec::HEADER_LEN {
            // New file, or a crash before the header reached disk.
            file.set_len(0)?;
            let mut header = &file;
            codec::write_header(&mut header)?;
            file.sync_all()?;
            (0, codec::HEADER_LEN)
        } else {
            Self::recover(path, &file)?
        };

        let file = OpenOptions::new().append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter { file, sequence, len }),
            sync_on_write,
        })
    }

    /// Scans every frame; returns the last sequence and the valid length.
    fn recover(path: &Path, file: &File) -> IoResult<(u64, u64)> {
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(File::open(path)?);
        codec::read_header(&mut reader)?;

        let mut sequence = 0;
        let mut valid_len = codec::HEADER_LEN;
        while valid_len < file_size {
            match codec::decode::<WalEntry>(&mut reader) {
                Ok(entry) => {
                    sequence = entry.sequence;
                    valid_len = reader.stream_position()?;
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) if e.kind() != ErrorKind::InvalidData => return Err(e),
                Err(e) => {
                    if reader.stream_position()? >= file_size {
                        break;
                    }
                    return Err(IoError::new(
                        ErrorKind::InvalidData,
                        format!("wal frame after sequence {sequence} at offset {valid_len}: {e}"),
                    ))
                }
            }
        }

        if valid_len < file_size {
            warn!(
                path = %path.display(),
                last_sequence = sequence,
                discarded_bytes = file_size - valid_len,
                "dropping torn wal tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        Ok((sequence, valid_len))
    }

    fn lock(&self) -> IoResult<MutexGuard<'_, WalWriter>> {
        self.writer.lock().map_err(|_| poisoned())
    }

    /// Appends `commit` as one frame; returns its sequence number.
    ///
    /// On failure the log is cut back to its previous length.
    pub fn append(&self, commit: &PassCommit) -> IoResult<u64> {
        let mut writer = self.lock()?;
        let sequence = writer.sequence + 1;
        let frame = codec::encode(&WalFrame {
            sequence,
            written_at: Utc::now(),
            commit,
        })?;

        let written = writer.file.write_all(&frame).and_then(|()| {
            if self.sync_on_write {
                writer.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            if let Err(rollback) = writer.file.set_len(writer.len) {
                warn!(error = %rollback, "could not cut back partial wal frame");
            }
            return Err(e);
        }

        writer.sequence = sequence;
        writer.len += frame.len() as u64;
        Ok(sequence)
    }

    /// Iterates over every frame from the start of the log.
    pub fn frames(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// Sequence number of the last appended frame.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.lock()?.sequence)
    }

    /// Continues numbering after `sequence` if the log itself is behind it.
    pub fn resume_after(&self, sequence: u64) -> IoResult<()> {
        let mut writer = self.lock()?;
        writer.sequence = writer.sequence.max(sequence);
        Ok(())
    }

    /// Current size of the log file in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(self.lock()?.len)
    }

    /// Drops every frame, keeping the sequence counter.
    ///
    /// Only call this once a checkpoint covering every frame is durable.
    pub fn truncate(&self) -> IoResult<()> {
        let mut writer = self.lock()?;
        writer.file.set_len(codec::HEADER_LEN)?;
        writer.file.sync_all()?;
        writer.len = codec::HEADER_LEN;
        Ok(())
    }
}

/// Iterator over log frames.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        Ok(Self { reader, file_size })
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.stream_position() {
            Ok(pos) if pos >= self.file_size => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e)),
        }

        match codec::decode(&mut self.reader) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Attribute;
    use crate::cluster::ClusterId;
    use crate::storage::{IndexEntry, JournalRecord};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn commit(value: &str, cluster: u64) -> PassCommit {
        PassCommit {
            records: vec![JournalRecord {
                attribute: Attribute::DunsNumber,
                entry: IndexEntry {
                    value: value.to_string(),
                    cluster_id: ClusterId::new(cluster),
                    prior_cluster_id: ClusterId::new(cluster),
                    source: "dit.datahub".to_string(),
                    timestamp: Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap(),
                },
            }],
            high_water: Some(ClusterId::new(cluster)),
        }
    }

    #[test]
    fn test_wal_append_and_iterate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("indices.wal");

        let wal = WriteAheadLog::open(&path, false).unwrap();
        assert_eq!(wal.append(&commit("dun1", 1)).unwrap(), 1);
        assert_eq!(wal.append(&commit("dun2", 2)).unwrap(), 2);
        drop(wal);

        let wal = WriteAheadLog::open(&path, false).unwrap();
        assert_eq!(wal.current_sequence().unwrap(), 2);
        let entries: Vec<_> = wal.frames().unwrap().map(Result::unwrap).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].commit, commit("dun2", 2));
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("indices.wal");
        {
            let wal = WriteAheadLog::open(&path, true).unwrap();
            wal.append(&commit("dun1", 1)).unwrap();
            wal.append(&commit("dun2", 2)).unwrap();
        }
        let full = std::fs::metadata(&path).unwrap().len();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(full - 7).unwrap();

        let wal = WriteAheadLog::open(&path, true).unwrap();
        assert_eq!(wal.current_sequence().unwrap(), 1);
        assert_eq!(wal.frames().unwrap().count(), 1);
        // Appends continue cleanly after the cut.
        assert_eq!(wal.append(&commit("dun3", 3)).unwrap(), 2);
        assert_eq!(wal.frames().unwrap().filter(Result::is_ok).count(), 2);
    }

    #[test]
    fn test_damage_before_last_frame_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("indices.wal");
        {
            let wal = WriteAheadLog::open(&path, false).unwrap();
            wal.append(&commit("dun1", 1)).unwrap();
            wal.append(&commit("dun2", 2)).unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        // Inside the first frame's JSON payload.
        bytes[codec::HEADER_LEN as usize + 8] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let err = WriteAheadLog::open(&path, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncate_keeps_sequence() {
        let dir = tempdir().unwrap();
        let wal = WriteAheadLog::open(&dir.path().join("indices.wal"), false).unwrap();
        wal.append(&commit("dun1", 1)).unwrap();
        wal.truncate().unwrap();

        assert_eq!(wal.size_bytes().unwrap(), codec::HEADER_LEN);
        assert_eq!(wal.frames().unwrap().count(), 0);
        assert_eq!(wal.append(&commit("dun2", 2)).unwrap(), 2);
    }

    #[test]
    fn test_resume_after_checkpoint_sequence() {
        let dir = tempdir().unwrap();
        let wal = WriteAheadLog::open(&dir.path().join("indices.wal"), false).unwrap();
        wal.resume_after(41).unwrap();
        assert_eq!(wal.append(&commit("dun1", 1)).unwrap(), 42);
    }
}
