//! Node correspondence maps: the transitive closure of the anchor pairs
//! over child-to-parent reachability, validated pair by pair and laid out
//! as one slot per donor node.

use std::collections::VecDeque;

use fixedbitset::FixedBitSet;
use fnv::FnvHashSet;

use tsunion_tables::{TableCollection, NULL};

use crate::error::MergeError;
use crate::identity::AnchorPairs;

/// Every node reachable from `seeds` by following child-to-parent edges,
/// the seeds included, in ascending id order. Explicit worklist; pedigrees
/// are deep enough that recursion is not an option.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn ancestors_of(tables: &TableCollection, seeds: &[i32]) -> Vec<i32> {
    let mut parents: Vec<Vec<i32>> = vec![Vec::new(); tables.num_nodes()];
    let mut dedup: FnvHashSet<(i32, i32)> = FnvHashSet::default();
    for edge in tables.edges() {
        if dedup.insert((edge.child, edge.parent)) {
            parents[edge.child as usize].push(edge.parent);
        }
    }

    let mut seen = FixedBitSet::with_capacity(tables.num_nodes());
    let mut queue: VecDeque<i32> = VecDeque::new();
    for &s in seeds {
        if !seen.put(s as usize) {
            queue.push_back(s);
        }
    }
    while let Some(node) = queue.pop_front() {
        for &p in &parents[node as usize] {
            if !seen.put(p as usize) {
                queue.push_back(p);
            }
        }
    }

    seen.ones().map(|i| i as i32).collect()
}

/// Expands the anchors into the full donor-to-base node map: the ancestor
/// closures on both sides must have the same size, and corresponding
/// entries must carry the same stable id at the same time. Any mismatch is
/// a contract violation between the two input records and aborts the merge.
///
/// # Errors
///
/// Fails when the closures differ in size or a propagated pair disagrees
/// on stable id or time.
pub fn closure_node_map(
    base: &TableCollection,
    donor: &TableCollection,
    anchors: &AnchorPairs,
) -> Result<Vec<i32>, MergeError> {
    let base_closure = ancestors_of(base, &anchors.base);
    let donor_closure = ancestors_of(donor, &anchors.donor);

    if base_closure.len() != donor_closure.len() {
        return Err(MergeError::ClosureSizeMismatch {
            a: base_closure.len(),
            b: donor_closure.len(),
        });
    }

    let mut node_map = vec![NULL; donor.num_nodes()];
    for (&bn, &dn) in base_closure.iter().zip(&donor_closure) {
        let base_node = &base.nodes()[bn as usize];
        let donor_node = &donor.nodes()[dn as usize];
        if base_node.slim_id() != donor_node.slim_id() || base_node.time != donor_node.time {
            return Err(MergeError::AncestorMismatch {
                base_node: bn,
                base_id: base_node.slim_id(),
                base_time: base_node.time,
                donor_node: dn,
                donor_id: donor_node.slim_id(),
                donor_time: donor_node.time,
            });
        }
        node_map[dn as usize] = bn;
    }
    Ok(node_map)
}

#[cfg(test)]
mod tests {
    use super::{ancestors_of, closure_node_map};
    use crate::error::MergeError;
    use crate::identity::AnchorPairs;
    use tsunion_tables::{NodeMetadata, TableCollection, NODE_IS_SAMPLE, NULL};

    fn meta(slim_id: i64) -> Option<NodeMetadata> {
        Some(NodeMetadata {
            slim_id,
            is_vacant: false,
        })
    }

    /// Three generations: founders 0 and 1 descend from parents 2 and 3,
    /// which coalesce in grandparent 4. Node 5 is an unrelated lineage.
    fn pedigree(extra_tip_id: i64) -> TableCollection {
        let mut tables = TableCollection::new(10.0);
        tables.add_population(None);
        tables.add_node(NODE_IS_SAMPLE, 0.0, 0, NULL, meta(20));
        tables.add_node(NODE_IS_SAMPLE, 0.0, 0, NULL, meta(21));
        tables.add_node(0, 1.0, 0, NULL, meta(10));
        tables.add_node(0, 1.0, 0, NULL, meta(11));
        tables.add_node(0, 2.0, 0, NULL, meta(5));
        tables.add_node(NODE_IS_SAMPLE, 0.0, 0, NULL, meta(extra_tip_id));
        tables.add_edge(0.0, 10.0, 2, 0);
        tables.add_edge(0.0, 10.0, 3, 1);
        tables.add_edge(0.0, 5.0, 4, 2);
        tables.add_edge(0.0, 10.0, 4, 3);
        tables
    }

    #[test]
    fn closure_includes_all_ancestors_and_no_others() {
        let tables = pedigree(99);
        assert_eq!(ancestors_of(&tables, &[0, 1]), vec![0, 1, 2, 3, 4]);
        assert_eq!(ancestors_of(&tables, &[0]), vec![0, 2, 4]);
        assert_eq!(ancestors_of(&tables, &[5]), vec![5]);
    }

    #[test]
    fn closure_map_pairs_both_sides() {
        let base = pedigree(99);
        let donor = pedigree(98);
        let anchors = AnchorPairs {
            base: vec![0, 1],
            donor: vec![0, 1],
        };
        let node_map = closure_node_map(&base, &donor, &anchors).unwrap();
        assert_eq!(node_map, vec![0, 1, 2, 3, 4, NULL]);
    }

    #[test]
    fn stable_id_disagreement_is_fatal() {
        let base = pedigree(99);
        let mut donor = pedigree(98);
        let mut nodes = donor.nodes().to_vec();
        nodes[4].metadata = meta(6);
        donor.replace_nodes(nodes);

        let anchors = AnchorPairs {
            base: vec![0, 1],
            donor: vec![0, 1],
        };
        assert!(matches!(
            closure_node_map(&base, &donor, &anchors),
            Err(MergeError::AncestorMismatch { donor_node: 4, .. })
        ));
    }
}
