//! Attribute indices.
//!
//! One [`AttributeIndex`] per identifying attribute maps a normalized value to
//! its [`IndexEntry`]. Two secondary maps answer "which values currently sit in
//! cluster X" and "which values sat in cluster X before their last change",
//! the latter being how the resolver finds lineage that a higher-priority
//! reassignment has made stale.

use std::collections::btree_map::BTreeMap;
use std::collections::btree_set::{self, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attribute::{Attribute, ATTRIBUTE_COUNT};
use crate::cluster::ClusterId;

use super::traits::{IndexRead, PassCommit};

/// Persisted value→cluster mapping with lineage and provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Normalized attribute value (the key).
    pub value: String,
    /// Current cluster.
    pub cluster_id: ClusterId,
    /// Cluster held before the last reassignment; equals `cluster_id` until then.
    pub prior_cluster_id: ClusterId,
    /// Source of the observation that produced the current state.
    pub source: String,
    /// Timestamp of the observation that produced the current state.
    pub timestamp: DateTime<Utc>,
}

impl IndexEntry {
    /// Computes the state that results from upserting over `existing`.
    #[must_use]
    pub fn upserted(
        existing: Option<&Self>,
        value: &str,
        cluster_id: ClusterId,
        source: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            value: value.to_string(),
            cluster_id,
            prior_cluster_id: existing.map_or(cluster_id, |e| e.cluster_id),
            source: source.to_string(),
            timestamp,
        }
    }

    /// Returns true if the entry has never been reassigned.
    #[must_use]
    pub fn is_original(&self) -> bool {
        self.prior_cluster_id == self.cluster_id
    }
}

/// Iterator over the entries named by a secondary-index bucket.
#[derive(Debug, Clone)]
pub struct BucketIter<'a> {
    entries: &'a BTreeMap<String, IndexEntry>,
    values: Option<btree_set::Iter<'a, String>>,
}

impl<'a> Iterator for BucketIter<'a> {
    type Item = &'a IndexEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let entries = self.entries;
        self.values.as_mut()?.find_map(|v| entries.get(v))
    }
}

fn unlink(bucket: &mut BTreeMap<ClusterId, BTreeSet<String>>, cluster: ClusterId, value: &str) {
    if let Some(set) = bucket.get_mut(&cluster) {
        set.remove(value);
        if set.is_empty() {
            bucket.remove(&cluster);
        }
    }
}

/// The index of one attribute.
#[derive(Debug, Clone, Default)]
pub struct AttributeIndex {
    entries: BTreeMap<String, IndexEntry>,
    by_cluster: BTreeMap<ClusterId, BTreeSet<String>>,
    by_prior: BTreeMap<ClusterId, BTreeSet<String>>,
}

impl AttributeIndex {
    /// Create a new empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an index (and its secondary maps) from stored entries.
    pub fn from_entries(entries: impl IntoIterator<Item = IndexEntry>) -> Self {
        let mut index = Self::new();
        for entry in entries {
            index.put(entry);
        }
        index
    }

    /// Point lookup.
    #[must_use]
    pub fn lookup(&self, value: &str) -> Option<&IndexEntry> {
        self.entries.get(value)
    }

    /// Returns true if `value` has an entry.
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        self.entries.contains_key(value)
    }

    /// Entries whose `prior_cluster_id` equals `cluster`, ascending by value.
    #[must_use]
    pub fn lookup_by_prior_cluster(&self, cluster: ClusterId) -> BucketIter<'_> {
        BucketIter {
            entries: &self.entries,
            values: self.by_prior.get(&cluster).map(BTreeSet::iter),
        }
    }

    /// Entries whose `cluster_id` equals `cluster`, ascending by value.
    #[must_use]
    pub fn lookup_by_cluster(&self, cluster: ClusterId) -> BucketIter<'_> {
        BucketIter {
            entries: &self.entries,
            values: self.by_cluster.get(&cluster).map(BTreeSet::iter),
        }
    }

    /// Creates or reassigns `value`.
    ///
    /// Returns the cluster the value held before the call, `None` if created.
    pub fn upsert(
        &mut self,
        value: &str,
        cluster_id: ClusterId,
        source: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<ClusterId> {
        let existing = self.entries.get(value);
        let previous = existing.map(|e| e.cluster_id);
        let entry = IndexEntry::upserted(existing, value, cluster_id, source, timestamp);
        self.put(entry);
        previous
    }

    /// Stores `entry` verbatim, replacing any previous state for its value.
    pub fn put(&mut self, entry: IndexEntry) {
        if let Some(old) = self.entries.get(&entry.value) {
            let (cluster, prior) = (old.cluster_id, old.prior_cluster_id);
            unlink(&mut self.by_cluster, cluster, &entry.value);
            unlink(&mut self.by_prior, prior, &entry.value);
        }
        self.by_cluster
            .entry(entry.cluster_id)
            .or_default()
            .insert(entry.value.clone());
        self.by_prior
            .entry(entry.prior_cluster_id)
            .or_default()
            .insert(entry.value.clone());
        self.entries.insert(entry.value.clone(), entry);
    }

    /// All entries, ascending by value.
    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the index holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest cluster id referenced by any entry (current or prior).
    #[must_use]
    pub fn max_cluster_id(&self) -> Option<ClusterId> {
        let current = self.by_cluster.keys().next_back().copied();
        let prior = self.by_prior.keys().next_back().copied();
        current.max(prior)
    }
}

/// The six attribute indices of one identity space.
#[derive(Debug, Clone, Default)]
pub struct IndexSet {
    indices: [AttributeIndex; ATTRIBUTE_COUNT],
}

impl IndexSet {
    /// Create an empty index set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The index of `attribute`.
    #[must_use]
    pub fn index(&self, attribute: Attribute) -> &AttributeIndex {
        &self.indices[attribute.rank()]
    }

    /// Mutable access to the index of `attribute`.
    pub fn index_mut(&mut self, attribute: Attribute) -> &mut AttributeIndex {
        &mut self.indices[attribute.rank()]
    }

    /// Applies every record of a committed pass, in order.
    pub fn apply(&mut self, commit: &PassCommit) {
        for record in &commit.records {
            self.index_mut(record.attribute).put(record.entry.clone());
        }
    }

    /// Total number of entries across all six indices.
    #[must_use]
    pub fn total_entries(&self) -> usize {
        self.indices.iter().map(AttributeIndex::len).sum()
    }

    /// Highest cluster id referenced anywhere in the set.
    #[must_use]
    pub fn max_cluster_id(&self) -> Option<ClusterId> {
        self.indices
            .iter()
            .filter_map(AttributeIndex::max_cluster_id)
            .max()
    }
}

impl IndexRead for IndexSet {
    fn lookup(&self, attribute: Attribute, value: &str) -> Option<&IndexEntry> {
        self.index(attribute).lookup(value)
    }

    fn lookup_by_prior_cluster(
        &self,
        attribute: Attribute,
        cluster: ClusterId,
    ) -> impl Iterator<Item = &IndexEntry> + Clone {
        self.index(attribute).lookup_by_prior_cluster(cluster)
    }

    fn lookup_by_cluster(
        &self,
        attribute: Attribute,
        cluster: ClusterId,
    ) -> impl Iterator<Item = &IndexEntry> + Clone {
        self.index(attribute).lookup_by_cluster(cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 1, day, 0, 0, 0).unwrap()
    }

    fn values<'a>(iter: impl Iterator<Item = &'a IndexEntry>) -> Vec<&'a str> {
        iter.map(|e| e.value.as_str()).collect()
    }

    #[test]
    fn upsert_creates_with_prior_equal_to_cluster() {
        let mut index = AttributeIndex::new();
        let previous = index.upsert("ch1", ClusterId::new(1), "dit.datahub", ts(1));

        assert_eq!(previous, None);
        let entry = index.lookup("ch1").unwrap();
        assert_eq!(entry.cluster_id, ClusterId::new(1));
        assert_eq!(entry.prior_cluster_id, ClusterId::new(1));
        assert!(entry.is_original());
    }

    #[test]
    fn upsert_moves_current_cluster_into_prior() {
        let mut index = AttributeIndex::new();
        index.upsert("dun1", ClusterId::new(1), "a", ts(1));
        let previous = index.upsert("dun1", ClusterId::new(2), "b", ts(2));

        assert_eq!(previous, Some(ClusterId::new(1)));
        let entry = index.lookup("dun1").unwrap();
        assert_eq!(entry.cluster_id, ClusterId::new(2));
        assert_eq!(entry.prior_cluster_id, ClusterId::new(1));
        assert_eq!(entry.source, "b");
        assert_eq!(entry.timestamp, ts(2));
    }

    #[test]
    fn secondary_lookups_follow_reassignment() {
        let mut index = AttributeIndex::new();
        index.upsert("b", ClusterId::new(1), "s", ts(1));
        index.upsert("a", ClusterId::new(1), "s", ts(1));
        index.upsert("c", ClusterId::new(2), "s", ts(1));

        assert_eq!(values(index.lookup_by_cluster(ClusterId::new(1))), vec!["a", "b"]);

        index.upsert("b", ClusterId::new(2), "s", ts(2));
        assert_eq!(values(index.lookup_by_cluster(ClusterId::new(1))), vec!["a"]);
        assert_eq!(values(index.lookup_by_cluster(ClusterId::new(2))), vec!["b", "c"]);
        // "a" was never reassigned so it still lists cluster 1 as prior; "b" now does too.
        assert_eq!(values(index.lookup_by_prior_cluster(ClusterId::new(1))), vec!["a", "b"]);
        assert_eq!(values(index.lookup_by_prior_cluster(ClusterId::new(2))), vec!["c"]);
    }

    #[test]
    fn bucket_iter_is_restartable() {
        let mut index = AttributeIndex::new();
        index.upsert("x", ClusterId::new(5), "s", ts(1));
        index.upsert("y", ClusterId::new(5), "s", ts(1));

        let iter = index.lookup_by_cluster(ClusterId::new(5));
        assert_eq!(iter.clone().count(), 2);
        assert_eq!(values(iter), vec!["x", "y"]);
        assert_eq!(index.lookup_by_cluster(ClusterId::new(9)).count(), 0);
    }

    #[test]
    fn from_entries_rebuilds_secondary_maps() {
        let entry = IndexEntry {
            value: "name1".to_string(),
            cluster_id: ClusterId::new(3),
            prior_cluster_id: ClusterId::new(1),
            source: "s".to_string(),
            timestamp: ts(4),
        };
        let index = AttributeIndex::from_entries(vec![entry.clone()]);

        assert_eq!(index.lookup_by_prior_cluster(ClusterId::new(1)).next(), Some(&entry));
        assert_eq!(index.lookup_by_cluster(ClusterId::new(3)).next(), Some(&entry));
        assert_eq!(index.max_cluster_id(), Some(ClusterId::new(3)));
    }

    #[test]
    fn index_set_routes_by_attribute() {
        let mut set = IndexSet::new();
        set.index_mut(Attribute::Postcode)
            .upsert("sw1a1aa", ClusterId::new(7), "s", ts(1));

        assert!(set.lookup(Attribute::Postcode, "sw1a1aa").is_some());
        assert!(set.lookup(Attribute::CompanyName, "sw1a1aa").is_none());
        assert_eq!(set.total_entries(), 1);
        assert_eq!(set.max_cluster_id(), Some(ClusterId::new(7)));
    }
}
