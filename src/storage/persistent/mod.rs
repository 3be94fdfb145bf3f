//! Durable index spaces.
//!
//! A persistent space lives in one directory:
//! - `.lock`: exclusive process lock, held while the space is open;
//! - `indices.wal`: one frame per committed pass since the last checkpoint;
//! - `indices.ckpt`: the latest full image of the six indices.
//!
//! On open the checkpoint is loaded, newer WAL frames are replayed, and the
//! cluster-id counter resumes after the highest id ever issued.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    PersistentIndexSpace                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  IndexSpace ──append──▶ WalJournal ──▶ WriteAheadLog         │
//! │                              │                               │
//! │                              └─checkpoint─▶ Checkpoint       │
//! │                                                              │
//! │                      FileLock (flock)                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod checkpoint;
mod codec;
mod file_lock;
mod wal;

pub use checkpoint::{Checkpoint, IndexImage};
pub use file_lock::FileLock;
pub use wal::{WalEntry, WalIterator, WriteAheadLog};

use std::fs;
use std::io::{Error as IoError, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cluster::{ClusterId, SequenceAllocator};
use crate::engine::Matcher;
use crate::error::{MatchError, MatchResult};
use crate::storage::{IndexSet, IndexSpace, PassCommit, PassJournal, StorageError};

const WAL_FILE: &str = "indices.wal";
const CHECKPOINT_FILE: &str = "indices.ckpt";

fn io_err(context: &str, e: IoError) -> StorageError {
    if e.kind() == ErrorKind::InvalidData {
        StorageError::Corruption(format!("{context}: {e}"))
    } else {
        StorageError::Io(IoError::new(e.kind(), format!("{context}: {e}")))
    }
}

/// Configuration for persistent index spaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentConfig {
    /// WAL size (bytes) above which a checkpoint is taken after a commit.
    pub max_wal_size: u64,
    /// Whether to fsync after every pass (slower but safer).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 64 * 1024 * 1024, // 64 MB
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    const MIN_WAL_SIZE: u64 = 4 * 1024; // 4 KiB minimum to avoid checkpointing every pass

    /// Checks the configuration, returning it unchanged when valid.
    ///
    /// # Errors
    ///
    /// Returns a storage error naming the out-of-range field.
    pub fn validate(self) -> MatchResult<Self> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(MatchError::Storage(StorageError::BackendError(format!(
                "max_wal_size must be at least {} bytes (got {})",
                Self::MIN_WAL_SIZE,
                self.max_wal_size
            ))));
        }
        Ok(self)
    }
}

/// Journal writing each pass to the WAL and checkpointing when it grows.
#[derive(Debug)]
struct WalJournal {
    wal: WriteAheadLog,
    checkpoint_path: PathBuf,
    max_wal_size: u64,
    /// Highest id ever journaled; 0 when none.
    high_water: AtomicU64,
    _lock: FileLock,
}

impl WalJournal {
    fn high_water(&self) -> Option<ClusterId> {
        match self.high_water.load(Ordering::Acquire) {
            0 => None,
            raw => Some(ClusterId::new(raw)),
        }
    }

    /// Writes `indices` as a checkpoint and empties the WAL.
    ///
    /// Callers must exclude writers so `indices` covers every WAL frame.
    fn checkpoint(&self, indices: &IndexSet) -> Result<CheckpointStats, StorageError> {
        let sequence = self.wal.current_sequence().map_err(|e| io_err("wal sequence", e))?;
        let wal_bytes_before = self.wal.size_bytes().map_err(|e| io_err("wal size", e))?;

        let checkpoint = Checkpoint::capture(indices, sequence, self.high_water());
        checkpoint
            .write(&self.checkpoint_path)
            .map_err(|e| io_err("write checkpoint", e))?;
        self.wal.truncate().map_err(|e| io_err("truncate wal", e))?;

        let stats = CheckpointStats {
            sequence,
            entries: checkpoint.entry_count(),
            wal_bytes_before,
        };
        info!(
            sequence = stats.sequence,
            entries = stats.entries,
            wal_bytes_before = stats.wal_bytes_before,
            "checkpoint written"
        );
        Ok(stats)
    }
}

impl PassJournal for WalJournal {
    fn append(&self, commit: &PassCommit) -> Result<(), StorageError> {
        self.wal
            .append(commit)
            .map_err(|e| StorageError::JournalFailed(e.to_string()))?;
        if let Some(id) = commit.high_water {
            self.high_water.fetch_max(id.get(), Ordering::AcqRel);
        }
        Ok(())
    }

    fn published(&self, indices: &IndexSet) -> Result<(), StorageError> {
        let size = self.wal.size_bytes().map_err(|e| io_err("wal size", e))?;
        if size > self.max_wal_size {
            self.checkpoint(indices)?;
        }
        Ok(())
    }
}

/// Result of a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointStats {
    /// Last WAL sequence folded into the checkpoint.
    pub sequence: u64,
    /// Entries written.
    pub entries: usize,
    /// WAL size before it was emptied.
    pub wal_bytes_before: u64,
}

/// An index space backed by a directory.
///
/// The directory stays locked until the space and every [`Matcher`] built on
/// it are dropped.
#[derive(Debug)]
pub struct PersistentIndexSpace {
    dir: PathBuf,
    space: Arc<IndexSpace>,
    allocator: Arc<SequenceAllocator>,
    journal: Arc<WalJournal>,
}

impl PersistentIndexSpace {
    fn open(dir: &Path, config: &PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| io_err("create index directory", e))?;
        let lock = FileLock::acquire(dir).map_err(|e| io_err("lock index directory", e))?;

        let checkpoint_path = dir.join(CHECKPOINT_FILE);
        let checkpoint = Checkpoint::read(&checkpoint_path).map_err(|e| io_err("read checkpoint", e))?;
        let (mut indices, base_sequence, mut high_water) = match &checkpoint {
            Some(c) => (c.restore(), c.sequence, c.high_water),
            None => (IndexSet::new(), 0, None),
        };

        let wal = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)
            .map_err(|e| io_err("open wal", e))?;
        wal.resume_after(base_sequence).map_err(|e| io_err("open wal", e))?;

        let mut replayed = 0usize;
        for entry in wal.frames().map_err(|e| io_err("read wal", e))? {
            let entry = entry.map_err(|e| io_err("replay wal", e))?;
            if entry.sequence <= base_sequence {
                // Folded into the checkpoint before the WAL was emptied.
                continue;
            }
            indices.apply(&entry.commit);
            high_water = high_water.max(entry.commit.high_water);
            replayed += 1;
        }

        let counter = high_water.max(indices.max_cluster_id());
        if counter > high_water {
            warn!(
                recorded = ?high_water.map(ClusterId::get),
                indexed = ?counter.map(ClusterId::get),
                "indices reference ids above the recorded counter"
            );
        }
        let allocator = Arc::new(counter.map_or_else(SequenceAllocator::new, SequenceAllocator::starting_after));

        info!(
            dir = %dir.display(),
            checkpoint_sequence = base_sequence,
            replayed,
            entries = indices.total_entries(),
            high_water = ?counter.map(ClusterId::get),
            "index space opened"
        );

        let journal = Arc::new(WalJournal {
            wal,
            checkpoint_path,
            max_wal_size: config.max_wal_size,
            high_water: AtomicU64::new(counter.map_or(0, ClusterId::get)),
            _lock: lock,
        });
        let space = Arc::new(IndexSpace::with_journal(indices, journal.clone()));

        Ok(Self {
            dir: dir.to_path_buf(),
            space,
            allocator,
            journal,
        })
    }

    /// The recovered index space.
    #[must_use]
    pub fn space(&self) -> &Arc<IndexSpace> {
        &self.space
    }

    /// The allocator resuming the durable counter.
    #[must_use]
    pub fn allocator(&self) -> &Arc<SequenceAllocator> {
        &self.allocator
    }

    /// A matcher over this space and its allocator.
    #[must_use]
    pub fn matcher(&self) -> Matcher {
        Matcher::new(self.space.clone(), self.allocator.clone())
    }

    /// The directory holding this space.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current WAL size in bytes.
    pub fn wal_size(&self) -> Result<u64, StorageError> {
        self.journal.wal.size_bytes().map_err(|e| io_err("wal size", e))
    }

    /// Writes a checkpoint now, waiting for any running pass.
    pub fn checkpoint(&self) -> Result<CheckpointStats, StorageError> {
        self.space.quiesce(|indices| self.journal.checkpoint(indices))?
    }
}

/// Open or create a persistent index space in directory `path`.
///
/// # Errors
/// - If the configuration is invalid
/// - If the directory cannot be created or accessed
/// - If another process holds the lock
/// - If the checkpoint or a WAL frame other than the last is corrupt
///
/// # Example
/// ```rust,no_run
/// use company_matching::storage::persistent::open_index_space;
///
/// let persistent = open_index_space("./indices", None)?;
/// let matcher = persistent.matcher();
/// # Ok::<(), company_matching::MatchError>(())
/// ```
pub fn open_index_space(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> MatchResult<PersistentIndexSpace> {
    let config = config.unwrap_or_default().validate()?;
    Ok(PersistentIndexSpace::open(path.as_ref(), &config)?)
}
