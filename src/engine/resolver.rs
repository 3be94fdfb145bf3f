//! Cascading index update.
//!
//! Attributes are resolved one at a time in priority order. Each step first
//! gathers evidence for the current attribute from reads only, then applies
//! the resulting reassignments; later steps observe earlier ones through the
//! pass overlay.
//!
//! Evidence for a value comes from two places:
//! - batch rows carrying the value, linking it to the clusters their
//!   already-resolved attributes now sit in;
//! - stored entries whose cluster is traced by a batch row's lineage, linking
//!   them to whatever replaced that cluster in already-resolved attributes.
//!   This is the cascade that re-clusters values absent from the batch.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attribute::{Attribute, ATTRIBUTE_COUNT};
use crate::cluster::{ClusterId, ClusterIdAllocator};
use crate::error::MatchResult;
use crate::storage::{IndexEntry, IndexRead, PassView};

use super::batch::{BatchStage, StagedRow};

/// Counters describing one resolver pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassSummary {
    /// Values indexed for the first time.
    pub created: usize,
    /// Existing values moved on evidence from the batch.
    pub reassigned: usize,
    /// Existing values absent from the batch, moved by the cascade.
    pub cascaded: usize,
    /// Fresh cluster ids drawn from the allocator.
    pub allocated: usize,
}

impl PassSummary {
    /// Total number of upserts issued.
    #[must_use]
    pub const fn upserts(&self) -> usize {
        self.created + self.reassigned + self.cascaded
    }
}

/// Where a piece of evidence came from. Batch evidence outranks stored
/// evidence at equal timestamps, and later rows outrank earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Origin {
    Stored,
    Batch(usize),
}

#[derive(Debug, Clone, Copy)]
struct Link {
    cluster: ClusterId,
    timestamp: DateTime<Utc>,
    origin: Origin,
}

impl Link {
    fn recency(&self) -> (DateTime<Utc>, Origin) {
        (self.timestamp, self.origin)
    }
}

type Links = [Option<Link>; ATTRIBUTE_COUNT];

/// One record of evidence about a value of the attribute being resolved.
#[derive(Debug)]
struct Evidence {
    source: String,
    timestamp: DateTime<Utc>,
    origin: Origin,
    links: Links,
}

/// All evidence about one value, merged.
#[derive(Debug)]
struct Candidate {
    existing: Option<ClusterId>,
    in_batch: bool,
    source: String,
    timestamp: DateTime<Utc>,
    origin: Origin,
    links: Links,
}

impl Candidate {
    fn new(existing: Option<ClusterId>, evidence: Evidence) -> Self {
        Self {
            existing,
            in_batch: matches!(evidence.origin, Origin::Batch(_)),
            source: evidence.source,
            timestamp: evidence.timestamp,
            origin: evidence.origin,
            links: evidence.links,
        }
    }

    fn absorb(&mut self, evidence: Evidence) {
        self.in_batch |= matches!(evidence.origin, Origin::Batch(_));

        for (slot, link) in self.links.iter_mut().zip(evidence.links) {
            let Some(link) = link else { continue };
            if slot.map_or(true, |current| link.recency() > current.recency()) {
                *slot = Some(link);
            }
        }

        if (evidence.timestamp, evidence.origin) > (self.timestamp, self.origin) {
            self.source = evidence.source;
            self.timestamp = evidence.timestamp;
            self.origin = evidence.origin;
        }
    }

    /// First link in priority order, else the value's own cluster.
    fn resolved(&self, processed: &[Attribute]) -> Option<ClusterId> {
        processed
            .iter()
            .find_map(|p| self.links[p.rank()].map(|link| link.cluster))
            .or(self.existing)
    }
}

fn offer(candidates: &mut BTreeMap<String, Candidate>, value: &str, existing: Option<ClusterId>, evidence: Evidence) {
    match candidates.get_mut(value) {
        Some(candidate) => candidate.absorb(evidence),
        None => {
            candidates.insert(value.to_string(), Candidate::new(existing, evidence));
        }
    }
}

/// The cluster a row's value of `attribute` descends from: its own cluster if
/// indexed, else the prior cluster of the row's most recently resolved
/// attribute.
fn lineage<R: IndexRead>(
    index: &R,
    row: &StagedRow,
    attribute: Attribute,
    processed: &[Attribute],
) -> Option<ClusterId> {
    if let Some(own) = row.value(attribute).and_then(|v| index.lookup(attribute, v)) {
        return Some(own.cluster_id);
    }
    processed
        .iter()
        .rev()
        .find_map(|&p| row.value(p).map(|v| (p, v)))
        .and_then(|(p, v)| index.lookup(p, v))
        .map(|entry| entry.prior_cluster_id)
}

/// Most recent entry that left (or was created in) `cluster`, first in value
/// order on ties.
fn successor<'i>(entries: impl Iterator<Item = &'i IndexEntry>) -> Option<&'i IndexEntry> {
    entries.fold(None, |best: Option<&IndexEntry>, entry| match best {
        Some(b) if entry.timestamp <= b.timestamp => Some(b),
        _ => Some(entry),
    })
}

/// Read phase of one step.
fn gather<R: IndexRead>(
    index: &R,
    stage: &BatchStage,
    attribute: Attribute,
    processed: &[Attribute],
) -> (BTreeMap<String, Candidate>, usize) {
    let mut candidates = BTreeMap::new();
    let mut impacted = BTreeSet::new();

    for row in stage.rows() {
        if let Some(cluster) = lineage(index, row, attribute, processed) {
            impacted.insert(cluster);
        }

        let Some(value) = row.value(attribute) else { continue };
        let origin = Origin::Batch(row.position);
        let mut links: Links = [None; ATTRIBUTE_COUNT];
        for &p in processed {
            links[p.rank()] = row
                .value(p)
                .and_then(|v| index.lookup(p, v))
                .map(|entry| Link {
                    cluster: entry.cluster_id,
                    timestamp: row.timestamp(),
                    origin,
                });
        }
        let existing = index.lookup(attribute, value).map(|e| e.cluster_id);
        offer(
            &mut candidates,
            value,
            existing,
            Evidence {
                source: row.source().to_string(),
                timestamp: row.timestamp(),
                origin,
                links,
            },
        );
    }

    if !processed.is_empty() {
        for &cluster in &impacted {
            for entry in index.lookup_by_cluster(attribute, cluster) {
                let mut links: Links = [None; ATTRIBUTE_COUNT];
                for &p in processed {
                    links[p.rank()] = successor(index.lookup_by_prior_cluster(p, entry.cluster_id)).map(|s| Link {
                        cluster: s.cluster_id,
                        timestamp: s.timestamp,
                        origin: Origin::Stored,
                    });
                }
                offer(
                    &mut candidates,
                    &entry.value,
                    Some(entry.cluster_id),
                    Evidence {
                        source: entry.source.clone(),
                        timestamp: entry.timestamp,
                        origin: Origin::Stored,
                        links,
                    },
                );
            }
        }
    }

    (candidates, impacted.len())
}

/// Brings all six indices in line with `stage`.
///
/// Writes go to `view`; nothing is visible outside the pass until the caller
/// publishes it.
///
/// # Errors
///
/// Fails only if the allocator does; the pass must then be discarded.
pub fn resolve(
    view: &mut PassView<'_>,
    stage: &BatchStage,
    allocator: &dyn ClusterIdAllocator,
) -> MatchResult<PassSummary> {
    let mut summary = PassSummary::default();
    let order = Attribute::ALL;

    for (step, &attribute) in order.iter().enumerate() {
        let processed = &order[..step];
        let (candidates, impacted) = gather(&*view, stage, attribute, processed);
        let considered = candidates.len();

        let mut ordered: Vec<_> = candidates.into_iter().collect();
        // Value order within a timestamp comes from the map.
        ordered.sort_by_key(|(_, candidate)| candidate.timestamp);

        let mut applied = 0;
        for (value, candidate) in ordered {
            let target = match candidate.resolved(processed) {
                Some(id) => id,
                None => {
                    let id = allocator.next()?;
                    view.note_allocated(id);
                    summary.allocated += 1;
                    id
                }
            };
            if candidate.existing == Some(target) {
                continue;
            }

            view.upsert(attribute, &value, target, &candidate.source, candidate.timestamp);
            applied += 1;
            match candidate.existing {
                None => summary.created += 1,
                Some(_) if candidate.in_batch => summary.reassigned += 1,
                Some(_) => summary.cascaded += 1,
            }
        }

        debug!(
            attribute = %attribute,
            candidates = considered,
            impacted,
            applied,
            "resolver step"
        );
    }

    Ok(summary)
}
