//! Storage contracts for the attribute indices.
//!
//! These traits define what the resolver and aggregator need from index
//! state, and what a durability backend must provide:
//! - [`IndexRead`] for committed state and for the in-flight pass view
//! - [`PassJournal`] for making a pass durable before it becomes visible

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attribute::Attribute;
use crate::cluster::ClusterId;

use super::index::{IndexEntry, IndexSet};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend error (poisoned lock, invariant breach).
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// The journal refused or failed to record a pass.
    #[error("Journal write failed: {0}")]
    JournalFailed(String),

    /// Persisted data failed validation.
    #[error("Corrupted storage: {0}")]
    Corruption(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Read access to the six attribute indices.
///
/// Sequence lookups are lazy, finite and restartable (the returned iterators
/// are `Clone`) and yield entries in ascending value order.
pub trait IndexRead {
    /// Point lookup of `value` in `attribute`'s index.
    fn lookup(&self, attribute: Attribute, value: &str) -> Option<&IndexEntry>;

    /// Every entry of `attribute` whose `prior_cluster_id` equals `cluster`.
    fn lookup_by_prior_cluster(
        &self,
        attribute: Attribute,
        cluster: ClusterId,
    ) -> impl Iterator<Item = &IndexEntry> + Clone;

    /// Every entry of `attribute` whose current `cluster_id` equals `cluster`.
    fn lookup_by_cluster(
        &self,
        attribute: Attribute,
        cluster: ClusterId,
    ) -> impl Iterator<Item = &IndexEntry> + Clone;
}

/// One upserted entry, in application order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Index the entry belongs to.
    pub attribute: Attribute,
    /// Full entry state after the upsert.
    pub entry: IndexEntry,
}

/// The complete set of writes produced by one resolver pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassCommit {
    /// Upserts in the order they were applied.
    pub records: Vec<JournalRecord>,
    /// Highest cluster id freshly allocated by the pass, if any.
    pub high_water: Option<ClusterId>,
}

impl PassCommit {
    /// Returns true if the pass changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Durability hook for committed passes.
///
/// # Contract
/// - `append` runs before the pass is published; an error aborts the pass and
///   leaves the committed indices unchanged.
/// - `published` runs after the pass is visible, still under the writer lock.
///   Its errors are logged, never surfaced, because the pass already committed.
pub trait PassJournal: Send + Sync {
    /// Durably record `commit`.
    fn append(&self, commit: &PassCommit) -> Result<(), StorageError>;

    /// Called with the post-commit indices (e.g. to checkpoint).
    fn published(&self, _indices: &IndexSet) -> Result<(), StorageError> {
        Ok(())
    }
}
