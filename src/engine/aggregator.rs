//! Per-observation aggregation.
//!
//! The aggregate cluster of an observation is the cluster of its
//! highest-priority indexed attribute; the agreement signature records which
//! attributes sit in that same cluster.

use crate::attribute::{Attribute, ATTRIBUTE_COUNT};
use crate::cluster::ClusterId;
use crate::outcome::{AgreementSignature, MatchOutcome, MatchValue};
use crate::storage::{IndexEntry, IndexRead};

use super::batch::{BatchStage, StagedRow};

/// Computes one outcome per staged row, in submission order.
///
/// With `projection` set, the aggregate cluster id is replaced by a value of
/// that attribute: the row's own value when present, else the most recently
/// indexed value in the aggregate cluster.
pub fn aggregate<R: IndexRead>(index: &R, stage: &BatchStage, projection: Option<Attribute>) -> Vec<MatchOutcome> {
    stage
        .rows()
        .iter()
        .map(|row| outcome(index, row, projection))
        .collect()
}

fn outcome<R: IndexRead>(index: &R, row: &StagedRow, projection: Option<Attribute>) -> MatchOutcome {
    let mut clusters: [Option<ClusterId>; ATTRIBUTE_COUNT] = [None; ATTRIBUTE_COUNT];
    for (attribute, value) in row.observation.attributes.present() {
        clusters[attribute.rank()] = index.lookup(attribute, value).map(|e| e.cluster_id);
    }

    let aggregate = clusters.iter().flatten().next().copied();
    let signature = Attribute::ALL
        .into_iter()
        .filter(|a| aggregate.is_some() && clusters[a.rank()] == aggregate)
        .fold(AgreementSignature::empty(), AgreementSignature::with);

    let value = match projection {
        None => aggregate.map_or(MatchValue::Unmatched, MatchValue::Cluster),
        Some(attribute) => row
            .value(attribute)
            .map(str::to_string)
            .or_else(|| aggregate.and_then(|cluster| latest_in_cluster(index, attribute, cluster)))
            .map_or(MatchValue::Unmatched, MatchValue::Identifier),
    };

    MatchOutcome {
        external_id: row.observation.external_id.clone(),
        value,
        signature,
    }
}

/// Most recent value of `attribute` in `cluster`; the smallest value wins ties.
fn latest_in_cluster<R: IndexRead>(index: &R, attribute: Attribute, cluster: ClusterId) -> Option<String> {
    index
        .lookup_by_cluster(attribute, cluster)
        .fold(None, |best: Option<&IndexEntry>, entry| match best {
            Some(b) if entry.timestamp <= b.timestamp => Some(b),
            _ => Some(entry),
        })
        .map(|entry| entry.value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::Observation;
    use crate::storage::IndexSet;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 1, day, 0, 0, 0).unwrap()
    }

    fn stage(rows: &[(&str, Option<&str>, Option<&str>)]) -> BatchStage {
        let observations = rows
            .iter()
            .map(|(id, ch, duns)| {
                Observation::builder()
                    .external_id(*id)
                    .source("s")
                    .timestamp(ts(9))
                    .maybe_attribute(Attribute::CompaniesHouseId, *ch)
                    .maybe_attribute(Attribute::DunsNumber, *duns)
                    .build()
                    .unwrap()
            })
            .collect();
        BatchStage::new(observations).unwrap()
    }

    fn indexed() -> IndexSet {
        let mut set = IndexSet::new();
        set.index_mut(Attribute::CompaniesHouseId)
            .upsert("ch1", ClusterId::new(1), "s", ts(1));
        let duns = set.index_mut(Attribute::DunsNumber);
        duns.upsert("dun1", ClusterId::new(1), "s", ts(1));
        duns.upsert("dun2", ClusterId::new(1), "s", ts(2));
        duns.upsert("dun0", ClusterId::new(1), "s", ts(2));
        duns.upsert("dun9", ClusterId::new(9), "s", ts(1));
        set
    }

    #[test]
    fn test_aggregate_and_signature() {
        let set = indexed();
        let out = aggregate(&set, &stage(&[("a", Some("ch1"), Some("dun9")), ("b", None, Some("dun1"))]), None);

        assert_eq!(out[0].value, MatchValue::Cluster(ClusterId::new(1)));
        assert_eq!(out[0].signature.to_string(), "100000");
        assert_eq!(out[1].value, MatchValue::Cluster(ClusterId::new(1)));
        assert_eq!(out[1].signature.to_string(), "010000");
    }

    #[test]
    fn test_unindexed_observation_is_unmatched() {
        let set = indexed();
        let out = aggregate(&set, &stage(&[("a", Some("ch7"), None)]), None);
        assert_eq!(out[0].value, MatchValue::Unmatched);
        assert_eq!(out[0].signature, AgreementSignature::empty());
    }

    #[test]
    fn test_projection_prefers_own_value_then_latest_smallest() {
        let set = indexed();
        let out = aggregate(
            &set,
            &stage(&[("a", Some("ch1"), Some("dun1")), ("b", Some("ch1"), None), ("c", Some("ch7"), None)]),
            Some(Attribute::DunsNumber),
        );

        assert_eq!(out[0].value, MatchValue::Identifier("dun1".to_string()));
        // dun0 and dun2 are equally recent.
        assert_eq!(out[1].value, MatchValue::Identifier("dun0".to_string()));
        assert_eq!(out[2].value, MatchValue::Unmatched);
    }

    #[test]
    fn test_results_follow_submission_order() {
        let set = indexed();
        let out = aggregate(&set, &stage(&[("z", Some("ch1"), None), ("a", Some("ch1"), None)]), None);
        let ids: Vec<_> = out.iter().map(|o| o.external_id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a"]);
    }
}
