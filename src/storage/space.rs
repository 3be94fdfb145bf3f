//! The committed indices of one logical identity space.
//!
//! A resolver pass runs under a single writer lock for its whole duration and
//! reads through a [`PassView`]; its writes are published with one short
//! exclusive section, so concurrent readers observe either the pre-pass or
//! the post-pass state and never a partially applied pass.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{info, warn};

use super::index::{IndexEntry, IndexSet};
use super::overlay::PassView;
use super::traits::{PassJournal, StorageError};
use crate::attribute::Attribute;

pub(crate) fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Shared owner of the six committed attribute indices.
pub struct IndexSpace {
    committed: RwLock<IndexSet>,
    writer: Mutex<()>,
    journal: Option<Arc<dyn PassJournal>>,
}

impl fmt::Debug for IndexSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSpace")
            .field("journaled", &self.journal.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for IndexSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexSpace {
    /// Create an empty, purely in-memory space.
    #[must_use]
    pub fn new() -> Self {
        Self::from_indices(IndexSet::new())
    }

    /// Create an in-memory space over existing indices.
    #[must_use]
    pub fn from_indices(indices: IndexSet) -> Self {
        Self {
            committed: RwLock::new(indices),
            writer: Mutex::new(()),
            journal: None,
        }
    }

    /// Create a space whose passes are recorded by `journal` before publication.
    #[must_use]
    pub fn with_journal(indices: IndexSet, journal: Arc<dyn PassJournal>) -> Self {
        Self {
            committed: RwLock::new(indices),
            writer: Mutex::new(()),
            journal: Some(journal),
        }
    }

    /// Runs `f` against a consistent snapshot of the committed indices.
    pub fn read<R>(&self, f: impl FnOnce(&IndexSet) -> R) -> Result<R, StorageError> {
        let committed = self.committed.read().map_err(|_| lock_err("space.read"))?;
        Ok(f(&committed))
    }

    /// Point lookup on committed state.
    pub fn lookup(&self, attribute: Attribute, value: &str) -> Result<Option<IndexEntry>, StorageError> {
        self.read(|set| set.index(attribute).lookup(value).cloned())
    }

    /// Runs one resolver pass.
    ///
    /// `f` sees committed state plus its own writes. If `f` fails, or the
    /// journal refuses the pass, nothing is published.
    pub fn write_pass<R, E>(&self, f: impl FnOnce(&mut PassView<'_>) -> Result<R, E>) -> Result<R, E>
    where
        E: From<StorageError>,
    {
        let _writer = self.writer.lock().map_err(|_| lock_err("space.writer"))?;

        let (result, commit) = {
            let committed = self.committed.read().map_err(|_| lock_err("space.pass_read"))?;
            let mut view = PassView::new(&committed);
            let result = f(&mut view)?;
            (result, view.into_commit())
        };

        if commit.is_empty() {
            return Ok(result);
        }

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&commit) {
                warn!(records = commit.records.len(), error = %e, "pass rejected by journal; rolled back");
                return Err(e.into());
            }
        }

        {
            let mut committed = self.committed.write().map_err(|_| lock_err("space.publish"))?;
            committed.apply(&commit);
        }
        info!(
            records = commit.records.len(),
            high_water = ?commit.high_water.map(|id| id.get()),
            "pass committed"
        );

        // Still under the writer lock, so the published image is stable.
        if let Some(journal) = &self.journal {
            let hook = self
                .read(|committed| journal.published(committed))
                .and_then(|outcome| outcome);
            if let Err(e) = hook {
                warn!(error = %e, "post-commit journal hook failed");
            }
        }

        Ok(result)
    }

    /// Runs `f` with writers excluded, e.g. to checkpoint a consistent image.
    pub fn quiesce<R>(&self, f: impl FnOnce(&IndexSet) -> R) -> Result<R, StorageError> {
        let _writer = self.writer.lock().map_err(|_| lock_err("space.quiesce"))?;
        self.read(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterId;
    use crate::storage::traits::{IndexRead, PassCommit};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingJournal {
        appended: AtomicUsize,
        published: AtomicUsize,
        fail: bool,
    }

    impl PassJournal for CountingJournal {
        fn append(&self, _commit: &PassCommit) -> Result<(), StorageError> {
            if self.fail {
                return Err(StorageError::JournalFailed("disk full".to_string()));
            }
            self.appended.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn published(&self, indices: &IndexSet) -> Result<(), StorageError> {
            assert!(indices.total_entries() > 0);
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn write_one(space: &IndexSpace) -> Result<(), StorageError> {
        let ts = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
        space.write_pass(|view| {
            view.upsert(Attribute::CompaniesHouseId, "ch1", ClusterId::new(1), "s", ts);
            assert!(view.lookup(Attribute::CompaniesHouseId, "ch1").is_some());
            Ok::<_, StorageError>(())
        })
    }

    #[test]
    fn pass_is_published_on_success() {
        let journal = Arc::new(CountingJournal::default());
        let space = IndexSpace::with_journal(IndexSet::new(), journal.clone());

        write_one(&space).unwrap();

        assert!(space.lookup(Attribute::CompaniesHouseId, "ch1").unwrap().is_some());
        assert_eq!(journal.appended.load(Ordering::SeqCst), 1);
        assert_eq!(journal.published.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn journal_failure_leaves_indices_untouched() {
        let journal = Arc::new(CountingJournal {
            fail: true,
            ..CountingJournal::default()
        });
        let space = IndexSpace::with_journal(IndexSet::new(), journal.clone());

        let err = write_one(&space).unwrap_err();
        assert!(matches!(err, StorageError::JournalFailed(_)));
        assert_eq!(space.read(IndexSet::total_entries).unwrap(), 0);
        assert_eq!(journal.published.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_pass_closure_publishes_nothing() {
        let space = IndexSpace::new();
        let ts = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();

        let result: Result<(), StorageError> = space.write_pass(|view| {
            view.upsert(Attribute::DunsNumber, "dun1", ClusterId::new(1), "s", ts);
            Err(StorageError::BackendError("read failed mid-pass".to_string()))
        });

        assert!(result.is_err());
        assert!(space.lookup(Attribute::DunsNumber, "dun1").unwrap().is_none());
    }

    #[test]
    fn empty_pass_skips_journal() {
        let journal = Arc::new(CountingJournal::default());
        let space = IndexSpace::with_journal(IndexSet::new(), journal.clone());

        space.write_pass(|_| Ok::<_, StorageError>(())).unwrap();
        assert_eq!(journal.appended.load(Ordering::SeqCst), 0);
    }
}
