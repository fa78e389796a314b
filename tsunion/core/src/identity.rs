//! Identity resolution: deciding which nodes of two records denote the
//! same genome at the same point in time. The primary key is the stable id
//! the simulator stored in node metadata; matching is scoped by time and,
//! where several populations exist, by population.

use fnv::FnvHashMap;

use tsunion_tables::{TableCollection, NULL};

use crate::error::MergeError;

const TIME_TOLERANCE: f64 = 1e-8;

/// Anchor node pairs, index-aligned: `base[i]` and `donor[i]` denote the
/// same genome.
#[derive(Clone, Debug, Default)]
pub struct AnchorPairs {
    pub base: Vec<i32>,
    pub donor: Vec<i32>,
}

/// Builds a full-length donor node map by stable id. A donor node matches a
/// base node when their stable ids and times are equal, the donor node is
/// no younger than `split_time`, and — with `match_population` — both sit
/// in the same population.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn split_time_node_map(
    base: &TableCollection,
    donor: &TableCollection,
    split_time: f64,
    match_population: bool,
) -> Vec<i32> {
    let mut by_id: FnvHashMap<i64, Vec<i32>> = FnvHashMap::default();
    for (i, node) in base.nodes().iter().enumerate() {
        if let Some(sid) = node.slim_id() {
            by_id.entry(sid).or_default().push(i as i32);
        }
    }

    let mut node_map = vec![NULL; donor.num_nodes()];
    for (i, node) in donor.nodes().iter().enumerate() {
        if node.time < split_time {
            continue;
        }
        let Some(sid) = node.slim_id() else {
            continue;
        };
        let Some(candidates) = by_id.get(&sid) else {
            continue;
        };
        for &c in candidates {
            let candidate = &base.nodes()[c as usize];
            if candidate.time != node.time {
                continue;
            }
            if match_population && candidate.population != node.population {
                continue;
            }
            node_map[i] = c;
            break;
        }
    }
    node_map
}

fn founder_nodes(
    tables: &TableCollection,
    key: &str,
    pedigree_ids: &[i64],
) -> Result<Vec<i32>, MergeError> {
    let index = tables.pedigree_index();
    let nodes = tables.individual_nodes();
    let mut out = Vec::new();
    for &pid in pedigree_ids {
        let individual = *index.get(&pid).ok_or_else(|| MergeError::UnknownFounder {
            key: key.to_owned(),
            pedigree_id: pid,
        })?;
        out.extend_from_slice(&nodes[individual]);
    }
    Ok(out)
}

/// Resolves the anchor set from the founder registries: for every group key
/// both records know, the declared founder sets must agree exactly, and the
/// founders' nodes on both sides must line up with equal times.
///
/// # Errors
///
/// Fails when the two records contradict each other about their own shared
/// history: diverging founder sets, a founder missing from a record, or
/// anchor counts/times that do not line up.
pub fn shared_founder_anchors(
    base: &TableCollection,
    donor: &TableCollection,
) -> Result<AnchorPairs, MergeError> {
    let base_founders = &base.metadata.user.founders;
    let donor_founders = &donor.metadata.user.founders;

    let mut anchors = AnchorPairs::default();
    for (key, base_set) in base_founders {
        let Some(donor_set) = donor_founders.get(key) else {
            continue;
        };
        let mut a = base_set.clone();
        let mut b = donor_set.clone();
        a.sort_unstable();
        b.sort_unstable();
        if a != b {
            return Err(MergeError::FounderSetMismatch {
                key: key.clone(),
                a,
                b,
            });
        }
        anchors
            .base
            .extend(founder_nodes(base, key, base_set)?);
        anchors
            .donor
            .extend(founder_nodes(donor, key, donor_set)?);
    }

    if anchors.base.len() != anchors.donor.len() {
        return Err(MergeError::AnchorCountMismatch {
            a: anchors.base.len(),
            b: anchors.donor.len(),
        });
    }
    for (&bn, &dn) in anchors.base.iter().zip(&anchors.donor) {
        let base_time = base.nodes()[bn as usize].time;
        let donor_time = donor.nodes()[dn as usize].time;
        if (base_time - donor_time).abs() > TIME_TOLERANCE {
            return Err(MergeError::AnchorTimeMismatch {
                base_node: bn,
                base_time,
                donor_node: dn,
                donor_time,
            });
        }
    }

    Ok(anchors)
}

#[cfg(test)]
mod tests {
    use super::{shared_founder_anchors, split_time_node_map};
    use crate::error::MergeError;
    use tsunion_tables::{
        IndividualMetadata, NodeMetadata, TableCollection, NODE_IS_SAMPLE, NULL,
    };

    fn meta(slim_id: i64) -> Option<NodeMetadata> {
        Some(NodeMetadata {
            slim_id,
            is_vacant: false,
        })
    }

    /// A chain of one node per tick from `top_time` down to zero, with
    /// stable ids shared below `fork_time` and private above it.
    fn forked(top_time: i64, fork_time: i64, private_base: i64) -> TableCollection {
        let mut tables = TableCollection::new(10.0);
        tables.add_population(None);
        #[allow(clippy::cast_precision_loss)]
        for t in (0..=top_time).rev() {
            let sid = if t >= fork_time { t } else { private_base + t };
            let flags = u32::from(t == 0) * NODE_IS_SAMPLE;
            let id = tables.add_node(flags, t as f64, 0, NULL, meta(sid));
            if id > 0 {
                tables.add_edge(0.0, 10.0, id - 1, id);
            }
        }
        tables
    }

    #[test]
    fn fork_matches_exactly_the_shared_era() {
        // both histories forked at time 50
        let base = forked(100, 50, 1000);
        let donor = forked(100, 50, 2000);

        let node_map = split_time_node_map(&base, &donor, 50.0, false);
        for (i, node) in donor.nodes().iter().enumerate() {
            if node.time >= 50.0 {
                assert_eq!(node_map[i], i32::try_from(i).unwrap());
            } else {
                assert_eq!(node_map[i], NULL);
            }
        }
    }

    #[test]
    fn population_scoping_blocks_lookalikes() {
        let mut base = TableCollection::new(10.0);
        base.add_population(None);
        base.add_population(None);
        base.add_node(0, 5.0, 1, NULL, meta(7));

        let mut donor = TableCollection::new(10.0);
        donor.add_population(None);
        donor.add_population(None);
        donor.add_node(0, 5.0, 0, NULL, meta(7));

        assert_eq!(split_time_node_map(&base, &donor, 0.0, true), vec![NULL]);
        assert_eq!(split_time_node_map(&base, &donor, 0.0, false), vec![0]);
    }

    fn founder_record(key: &str, pedigree_id: i64, time: f64) -> TableCollection {
        let mut tables = TableCollection::new(10.0);
        tables.add_population(None);
        let ind = tables.add_individual(
            0,
            vec![],
            Some(IndividualMetadata {
                pedigree_id,
                age: 1,
            }),
        );
        tables.add_node(NODE_IS_SAMPLE, time, 0, ind, meta(pedigree_id * 2));
        tables.add_node(NODE_IS_SAMPLE, time, 0, ind, meta(pedigree_id * 2 + 1));
        tables
            .metadata
            .user
            .founders
            .insert(key.to_owned(), vec![pedigree_id]);
        tables
    }

    #[test]
    fn founder_anchors_pair_up_genomes() {
        let base = founder_record("h1", 11, 4.0);
        let donor = founder_record("h1", 11, 4.0);
        let anchors = shared_founder_anchors(&base, &donor).unwrap();
        assert_eq!(anchors.base, vec![0, 1]);
        assert_eq!(anchors.donor, vec![0, 1]);
    }

    #[test]
    fn diverging_founder_sets_are_fatal() {
        let base = founder_record("h1", 11, 4.0);
        let mut donor = founder_record("h1", 11, 4.0);
        donor
            .metadata
            .user
            .founders
            .insert("h1".to_owned(), vec![12]);
        let err = shared_founder_anchors(&base, &donor).unwrap_err();
        match err {
            MergeError::FounderSetMismatch { key, .. } => assert_eq!(key, "h1"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn anchor_time_skew_is_fatal() {
        let base = founder_record("h1", 11, 4.0);
        let donor = founder_record("h1", 11, 6.0);
        assert!(matches!(
            shared_founder_anchors(&base, &donor),
            Err(MergeError::AnchorTimeMismatch { .. })
        ));
    }
}
