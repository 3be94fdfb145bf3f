//! Full-image checkpoints of the six indices.
//!
//! A checkpoint is written to a temporary file, synced, and renamed over the
//! previous one, so the checkpoint on disk is always complete.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::codec;
use crate::attribute::Attribute;
use crate::cluster::ClusterId;
use crate::storage::{IndexEntry, IndexSet};

/// Every entry of one attribute index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexImage {
    /// The attribute.
    pub attribute: Attribute,
    /// Entries in ascending value order.
    pub entries: Vec<IndexEntry>,
}

/// Point-in-time image of an index space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last WAL sequence folded into this image.
    pub sequence: u64,
    /// Durable cluster-id counter at the time of the image.
    pub high_water: Option<ClusterId>,
    /// When the image was taken.
    pub written_at: DateTime<Utc>,
    /// One image per attribute, in priority order.
    pub indices: Vec<IndexImage>,
}

impl Checkpoint {
    /// Captures `indices` as of WAL `sequence`.
    #[must_use]
    pub fn capture(indices: &IndexSet, sequence: u64, high_water: Option<ClusterId>) -> Self {
        Self {
            sequence,
            high_water,
            written_at: Utc::now(),
            indices: Attribute::ALL
                .into_iter()
                .map(|attribute| IndexImage {
                    attribute,
                    entries: indices.index(attribute).iter().cloned().collect(),
                })
                .collect(),
        }
    }

    /// Rebuilds the index set, secondary maps included.
    #[must_use]
    pub fn restore(&self) -> IndexSet {
        let mut set = IndexSet::new();
        for image in &self.indices {
            let index = set.index_mut(image.attribute);
            for entry in &image.entries {
                index.put(entry.clone());
            }
        }
        set
    }

    /// Number of entries across all attributes.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.indices.iter().map(|image| image.entries.len()).sum()
    }

    /// Atomically replaces the checkpoint at `path`.
    pub fn write(&self, path: &Path) -> IoResult<()> {
        let temp_path = temp_path(path);
        let result = (|| {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            let mut writer = BufWriter::new(file);
            codec::write_header(&mut writer)?;
            writer.write_all(&codec::encode(self)?)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            fs::rename(&temp_path, path)?;
            sync_parent(path)
        })();

        if result.is_err() {
            // Best effort: a leftover temp file is ignored and overwritten next time.
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    /// Reads the checkpoint at `path`, if one exists.
    pub fn read(path: &Path) -> IoResult<Option<Self>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        codec::decode(&mut reader).map(Some)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> IoResult<()> {
    match path.parent() {
        Some(dir) => File::open(dir)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> IoResult<()> {
    Ok(())
}
