//! Pass overlay over committed indices.
//!
//! Key invariants:
//! - Writes of an in-flight pass never reach the committed indices.
//! - Reads merge committed + pass writes (merge-on-read), pass writes win.
//! - The overlay grows with the batch, not with the committed indices.

use std::iter::Peekable;

use chrono::{DateTime, Utc};

use crate::attribute::Attribute;
use crate::cluster::ClusterId;

use super::index::{AttributeIndex, BucketIter, IndexEntry, IndexSet};
use super::traits::{IndexRead, JournalRecord, PassCommit};

/// Ascending-by-value merge of a committed bucket and a pass bucket.
///
/// Committed entries whose value was rewritten by the pass are skipped.
#[derive(Debug, Clone)]
pub struct OverlayIter<'v> {
    base: Peekable<BucketIter<'v>>,
    delta: Peekable<BucketIter<'v>>,
    shadow: &'v AttributeIndex,
}

impl<'v> Iterator for OverlayIter<'v> {
    type Item = &'v IndexEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let shadow = self.shadow;
        while self.base.next_if(|e| shadow.contains(&e.value)).is_some() {}

        let take_base = match (self.base.peek(), self.delta.peek()) {
            (Some(b), Some(d)) => b.value < d.value,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if take_base {
            self.base.next()
        } else {
            self.delta.next()
        }
    }
}

/// Read/write view of the indices for the duration of one resolver pass.
#[derive(Debug)]
pub struct PassView<'a> {
    base: &'a IndexSet,
    delta: IndexSet,
    records: Vec<JournalRecord>,
    high_water: Option<ClusterId>,
}

impl<'a> PassView<'a> {
    /// Opens an empty overlay over `base`.
    #[must_use]
    pub fn new(base: &'a IndexSet) -> Self {
        Self {
            base,
            delta: IndexSet::new(),
            records: Vec::new(),
            high_water: None,
        }
    }

    /// Creates or reassigns `value` in `attribute`'s index, visible to later
    /// reads through this view only.
    ///
    /// Returns the cluster the value held before the call, `None` if created.
    pub fn upsert(
        &mut self,
        attribute: Attribute,
        value: &str,
        cluster_id: ClusterId,
        source: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<ClusterId> {
        let existing = self.lookup(attribute, value);
        let previous = existing.map(|e| e.cluster_id);
        let entry = IndexEntry::upserted(existing, value, cluster_id, source, timestamp);

        self.records.push(JournalRecord {
            attribute,
            entry: entry.clone(),
        });
        self.delta.index_mut(attribute).put(entry);
        previous
    }

    /// Records a freshly allocated id so the durable counter can follow it.
    pub fn note_allocated(&mut self, id: ClusterId) {
        self.high_water = self.high_water.max(Some(id));
    }

    /// Number of upserts issued through this view.
    #[must_use]
    pub fn upserts(&self) -> usize {
        self.records.len()
    }

    /// Consumes the view, yielding the writes to publish.
    #[must_use]
    pub fn into_commit(self) -> PassCommit {
        PassCommit {
            records: self.records,
            high_water: self.high_water,
        }
    }

    fn overlay<'s>(
        &'s self,
        attribute: Attribute,
        base: BucketIter<'s>,
        delta: BucketIter<'s>,
    ) -> OverlayIter<'s> {
        OverlayIter {
            base: base.peekable(),
            delta: delta.peekable(),
            shadow: self.delta.index(attribute),
        }
    }
}

impl IndexRead for PassView<'_> {
    fn lookup(&self, attribute: Attribute, value: &str) -> Option<&IndexEntry> {
        self.delta
            .index(attribute)
            .lookup(value)
            .or_else(|| self.base.index(attribute).lookup(value))
    }

    fn lookup_by_prior_cluster(
        &self,
        attribute: Attribute,
        cluster: ClusterId,
    ) -> impl Iterator<Item = &IndexEntry> + Clone {
        self.overlay(
            attribute,
            self.base.index(attribute).lookup_by_prior_cluster(cluster),
            self.delta.index(attribute).lookup_by_prior_cluster(cluster),
        )
    }

    fn lookup_by_cluster(
        &self,
        attribute: Attribute,
        cluster: ClusterId,
    ) -> impl Iterator<Item = &IndexEntry> + Clone {
        self.overlay(
            attribute,
            self.base.index(attribute).lookup_by_cluster(cluster),
            self.delta.index(attribute).lookup_by_cluster(cluster),
        )
    }
}
