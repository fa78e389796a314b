//! The pairwise merge engine: population reconciliation, the union call
//! with its divergence diagnostic, and reconciliation of the registries
//! and biographical metadata the two records carry.

use std::fmt::Write as _;

use fnv::FnvHashMap;

use tsunion_tables::{
    PopulationRow, RemapLog, TableCollection, TablesError, UnionOptions, NULL,
};

use crate::error::MergeError;
use crate::identity::{shared_founder_anchors, split_time_node_map};
use crate::node_map::closure_node_map;

/// Reconciles two population tables positionally. For an index present in
/// both, the rows must be identical or at most one side may carry
/// metadata; the longer table contributes its tail.
///
/// # Errors
///
/// Fails, naming the index, when both sides carry metadata that disagrees.
pub fn merge_population_tables(
    a: &[PopulationRow],
    b: &[PopulationRow],
) -> Result<Vec<PopulationRow>, MergeError> {
    let mut out = Vec::with_capacity(a.len().max(b.len()));
    for index in 0..a.len().max(b.len()) {
        let row_a = a.get(index);
        let row_b = b.get(index);
        let row = match (row_a, row_b) {
            (Some(ra), Some(rb)) => {
                if ra.is_placeholder() {
                    rb.clone()
                } else if rb.is_placeholder() || ra == rb {
                    ra.clone()
                } else {
                    return Err(MergeError::PopulationConflict { index });
                }
            }
            (Some(row), None) | (None, Some(row)) => row.clone(),
            (None, None) => unreachable!(),
        };
        out.push(row);
    }
    Ok(out)
}

/// Additively merges two remap logs. The same old id and population mapped
/// to two different new ids is a real conflict and is fatal.
///
/// # Errors
///
/// Fails, naming the conflicting key, on contradictory entries.
pub fn merge_remap_logs(a: &RemapLog, b: &RemapLog) -> Result<RemapLog, MergeError> {
    let mut out = a.clone();
    for (&old_id, inner) in b {
        let entry = out.entry(old_id).or_default();
        for (&population, &new_id) in inner {
            match entry.get(&population) {
                None => {
                    entry.insert(population, new_id);
                }
                Some(&existing) if existing == new_id => {}
                Some(&existing) => {
                    return Err(MergeError::RemapConflict {
                        old_id,
                        population,
                        a: existing,
                        b: new_id,
                    });
                }
            }
        }
    }
    Ok(out)
}

fn first_difference<T: PartialEq + std::fmt::Debug>(
    label: &str,
    a: &[T],
    b: &[T],
    summary: &mut String,
) -> bool {
    if a.len() != b.len() {
        let _ = write!(summary, "{label}: {} rows against {}", a.len(), b.len());
        return true;
    }
    if let Some(row) = a.iter().zip(b).position(|(x, y)| x != y) {
        let _ = write!(
            summary,
            "{label} row {row}: {:?} against {:?}",
            a[row], b[row]
        );
        return true;
    }
    false
}

/// Narrows a rejected union down to a diagnosable statement: extracts the
/// claimed-shared node subsets from both records, canonicalizes them, and
/// names the first table row on which they disagree.
#[allow(clippy::cast_possible_truncation)]
fn diagnose_shared_divergence(
    base: &TableCollection,
    donor: &TableCollection,
    node_map: &[i32],
) -> MergeError {
    let shared_donor: Vec<i32> = (0..node_map.len() as i32)
        .filter(|&i| node_map[i as usize] != NULL)
        .collect();
    let shared_base: Vec<i32> = shared_donor
        .iter()
        .map(|&i| node_map[i as usize])
        .collect();
    let (donor_sub, _) = donor.subset(&shared_donor);
    let (base_sub, _) = base.subset(&shared_base);

    // sample flags and population labels may legitimately differ between
    // records; the comparison covers times, stable ids and structure
    let comparable =
        |sub: &TableCollection| -> Vec<(f64, Option<tsunion_tables::NodeMetadata>)> {
            sub.nodes()
                .iter()
                .map(|n| (n.time, n.metadata.clone()))
                .collect()
        };

    let mut summary = String::new();
    let found = first_difference(
        "nodes",
        &comparable(&base_sub),
        &comparable(&donor_sub),
        &mut summary,
    )
        || first_difference("edges", base_sub.edges(), donor_sub.edges(), &mut summary)
        || first_difference("sites", base_sub.sites(), donor_sub.sites(), &mut summary)
        || first_difference(
            "mutations",
            base_sub.mutations(),
            donor_sub.mutations(),
            &mut summary,
        );
    if !found {
        summary.push_str("the subsets differ only in fields the comparison ignores");
    }
    MergeError::SharedDivergence { summary }
}

fn merge_user_metadata(
    merged: &mut TableCollection,
    donor: &TableCollection,
) -> Result<(), MergeError> {
    let donor_user = &donor.metadata.user;
    let user = &mut merged.metadata.user;

    for (key, donor_set) in &donor_user.founders {
        let entry = user.founders.entry(key.clone()).or_default();
        entry.extend(donor_set.iter().copied());
        entry.sort_unstable();
        entry.dedup();
    }

    for (key, &donor_time) in &donor_user.founding_time {
        match user.founding_time.get(key) {
            None => {
                user.founding_time.insert(key.clone(), donor_time);
            }
            Some(&time) if time == donor_time => {}
            Some(&time) => {
                return Err(MergeError::FoundingTimeMismatch {
                    key: key.clone(),
                    a: time,
                    b: donor_time,
                });
            }
        }
    }

    for host in &donor_user.output_host_ids {
        if !user.output_host_ids.contains(host) {
            user.output_host_ids.push(host.clone());
        }
    }
    if user.host_id.is_none() {
        user.host_id.clone_from(&donor_user.host_id);
    }

    user.id_remaps = merge_remap_logs(&user.id_remaps, &donor_user.id_remaps)?;
    Ok(())
}

/// Applies the most-complete-wins policy to biographical metadata: where
/// both records carry the same pedigree id, the strictly larger recorded
/// age replaces the smaller. This is a policy choice (the later observation
/// is taken to be the more complete one), not an invariant.
fn reconcile_individual_ages(merged: &mut TableCollection, donor: &TableCollection) {
    let donor_ages: FnvHashMap<i64, i64> = donor
        .individuals()
        .iter()
        .filter_map(|ind| ind.metadata.as_ref().map(|m| (m.pedigree_id, m.age)))
        .collect();

    let mut individuals = merged.individuals().to_vec();
    for ind in &mut individuals {
        if let Some(meta) = &mut ind.metadata {
            if let Some(&donor_age) = donor_ages.get(&meta.pedigree_id) {
                if donor_age > meta.age {
                    debug!(
                        "individual {}: taking age {donor_age} over {}",
                        meta.pedigree_id, meta.age
                    );
                    meta.age = donor_age;
                }
            }
        }
    }
    merged.replace_individuals(individuals);
}

/// Merges the donor record into a copy of the base record through the
/// given node map and reconciles every piece of shared state: population
/// tables, founder and founding-time registries, remap logs, and
/// biographical metadata.
///
/// Returns the merged collection together with the complete donor-to-merged
/// node translation.
///
/// # Errors
///
/// Fails on any inconsistency between the records; see [`MergeError`].
pub fn merge_tables(
    base: &TableCollection,
    donor: &TableCollection,
    node_map: &[i32],
    check_shared_equality: bool,
) -> Result<(TableCollection, Vec<i32>), MergeError> {
    if base.metadata.tick != donor.metadata.tick {
        return Err(MergeError::TickMismatch {
            a: base.metadata.tick,
            b: donor.metadata.tick,
        });
    }

    let populations = merge_population_tables(base.populations(), donor.populations())?;
    let mut merged = base.clone();
    merged.replace_populations(populations.clone());
    let mut donor_aligned = donor.clone();
    donor_aligned.replace_populations(populations);

    let options = UnionOptions {
        add_populations: false,
        check_shared_equality,
    };
    let donor_trans = match merged.union(&donor_aligned, node_map, options) {
        Ok(trans) => trans,
        Err(TablesError::SharedDivergence { .. }) => {
            return Err(diagnose_shared_divergence(base, donor, node_map));
        }
        Err(other) => return Err(other.into()),
    };

    merge_user_metadata(&mut merged, donor)?;
    reconcile_individual_ages(&mut merged, donor);
    merged.check_integrity()?;

    info!(
        "merged {} donor nodes ({} shared) into a record of {} nodes",
        donor.num_nodes(),
        node_map.iter().filter(|&&m| m != NULL).count(),
        merged.num_nodes()
    );
    Ok((merged, donor_trans))
}

/// Pairwise merge keyed on a split time: nodes older than the split with
/// matching stable ids are identified, everything younger stays separate.
///
/// # Errors
///
/// See [`merge_tables`].
pub fn merge_at_split(
    base: &TableCollection,
    donor: &TableCollection,
    split_time: Option<f64>,
    check_shared_equality: bool,
) -> Result<(TableCollection, Vec<i32>), MergeError> {
    let match_population =
        base.populations().len() > 1 || donor.populations().len() > 1;
    let node_map = split_time_node_map(
        base,
        donor,
        split_time.unwrap_or(f64::NEG_INFINITY),
        match_population,
    );
    merge_tables(base, donor, &node_map, check_shared_equality)
}

/// Pairwise merge keyed on the founder registries: the anchors are the
/// genomes of the founders both records declare for a common group, and
/// the map is their ancestor closure.
///
/// # Errors
///
/// See [`merge_tables`] and [`closure_node_map`].
pub fn merge_with_founders(
    base: &TableCollection,
    donor: &TableCollection,
    check_shared_equality: bool,
) -> Result<(TableCollection, Vec<i32>), MergeError> {
    let anchors = shared_founder_anchors(base, donor)?;
    let node_map = closure_node_map(base, donor, &anchors)?;
    merge_tables(base, donor, &node_map, check_shared_equality)
}

/// Reduces a list of clock-aligned records pairwise through their founder
/// registries, left to right.
///
/// # Errors
///
/// Fails on the first pairwise inconsistency; no partial result is
/// produced.
pub fn merge_all_with_founders(
    first: TableCollection,
    rest: Vec<TableCollection>,
    check_shared_equality: bool,
) -> Result<TableCollection, MergeError> {
    let mut acc = first;
    for donor in rest {
        let (merged, _) = merge_with_founders(&acc, &donor, check_shared_equality)?;
        acc = merged;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::{
        merge_at_split, merge_population_tables, merge_remap_logs, merge_tables,
        merge_with_founders,
    };
    use crate::error::MergeError;
    use std::collections::BTreeMap;
    use tsunion_tables::{
        IndividualMetadata, NodeMetadata, PopulationMetadata, PopulationRow, RemapLog,
        TableCollection, NODE_IS_SAMPLE, NULL,
    };

    fn meta(slim_id: i64) -> Option<NodeMetadata> {
        Some(NodeMetadata {
            slim_id,
            is_vacant: false,
        })
    }

    fn pop(name: &str) -> PopulationRow {
        PopulationRow {
            metadata: Some(PopulationMetadata {
                slim_id: 1,
                name: name.to_owned(),
                description: String::new(),
            }),
        }
    }

    fn placeholder() -> PopulationRow {
        PopulationRow { metadata: None }
    }

    #[test]
    fn population_conflict_names_the_index() {
        let a = vec![placeholder(), pop("p1"), pop("p2")];
        let b = vec![placeholder(), pop("p1"), pop("x")];
        match merge_population_tables(&a, &b) {
            Err(MergeError::PopulationConflict { index }) => assert_eq!(index, 2),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn population_tables_tail_extend() {
        let a = vec![placeholder(), pop("p1")];
        let b = vec![pop("p0"), placeholder(), pop("p2")];
        let merged = merge_population_tables(&a, &b).unwrap();
        assert_eq!(merged, vec![pop("p0"), pop("p1"), pop("p2")]);
    }

    #[test]
    fn remap_log_conflicts_are_fatal() {
        let mut a: RemapLog = BTreeMap::new();
        a.entry(1000).or_default().insert(3, 31000);
        let mut b: RemapLog = BTreeMap::new();
        b.entry(1000).or_default().insert(3, 41000);

        assert!(merge_remap_logs(&a, &a.clone()).is_ok());
        match merge_remap_logs(&a, &b) {
            Err(MergeError::RemapConflict {
                old_id, population, ..
            }) => {
                assert_eq!((old_id, population), (1000, 3));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    /// A founder individual (two genomes at `time`) with private sample
    /// descendants labelled from `tip_base`.
    fn host_record(key: &str, pedigree_id: i64, time: f64, tip_base: i64) -> TableCollection {
        let mut tables = TableCollection::new(10.0);
        tables.add_population(None);
        let ind = tables.add_individual(
            0,
            vec![],
            Some(IndividualMetadata {
                pedigree_id,
                age: 2,
            }),
        );
        let g0 = tables.add_node(NODE_IS_SAMPLE, time, 0, ind, meta(pedigree_id * 2));
        let g1 = tables.add_node(NODE_IS_SAMPLE, time, 0, ind, meta(pedigree_id * 2 + 1));
        let t0 = tables.add_node(NODE_IS_SAMPLE, 0.0, 0, NULL, meta(tip_base));
        let t1 = tables.add_node(NODE_IS_SAMPLE, 0.0, 0, NULL, meta(tip_base + 1));
        tables.add_edge(0.0, 10.0, g0, t0);
        tables.add_edge(0.0, 10.0, g1, t1);
        tables
            .metadata
            .user
            .founders
            .insert(key.to_owned(), vec![pedigree_id]);
        tables.metadata.user.founding_time.insert(key.to_owned(), 4);
        tables
    }

    #[test]
    fn founder_merge_reuses_shared_genomes() {
        let base = host_record("h1", 11, 4.0, 500);
        let donor = host_record("h1", 11, 4.0, 600);

        let (merged, trans) = merge_with_founders(&base, &donor, true).unwrap();

        // founder genomes are shared, only the donor tips are new
        assert_eq!(merged.num_nodes(), 6);
        assert_eq!(trans[0], 0);
        assert_eq!(trans[1], 1);
        assert_eq!(merged.num_edges(), 4);
        assert_eq!(
            merged.metadata.user.founders.get("h1"),
            Some(&vec![11_i64])
        );
    }

    #[test]
    fn founder_registries_union_per_key() {
        // records joined by stable ids, not by founder anchors, may each
        // have seen additional founders for the same group
        let mut base = host_record("h1", 11, 4.0, 500);
        base.metadata
            .user
            .founders
            .insert("h2".to_owned(), vec![11, 13]);
        let mut donor = host_record("hx", 21, 4.0, 600);
        donor
            .metadata
            .user
            .founders
            .insert("h2".to_owned(), vec![11, 14]);
        donor
            .metadata
            .user
            .founders
            .insert("h3".to_owned(), vec![15]);

        let (merged, _) = merge_at_split(&base, &donor, Some(0.0), true).unwrap();
        let founders = &merged.metadata.user.founders;
        assert_eq!(founders.get("h2"), Some(&vec![11, 13, 14]));
        assert_eq!(founders.get("h3"), Some(&vec![15]));
        assert_eq!(founders.get("h1"), Some(&vec![11]));
    }

    #[test]
    fn founder_anchored_merge_rejects_diverging_sets() {
        let base = host_record("h1", 11, 4.0, 500);
        let mut donor = host_record("h1", 11, 4.0, 600);
        donor
            .metadata
            .user
            .founders
            .insert("h1".to_owned(), vec![11, 12]);
        assert!(matches!(
            merge_with_founders(&base, &donor, true),
            Err(MergeError::FounderSetMismatch { .. })
        ));
    }

    #[test]
    fn larger_recorded_age_wins() {
        let base = host_record("h1", 11, 4.0, 500);
        let mut donor = host_record("h1", 11, 4.0, 600);
        let mut individuals = donor.individuals().to_vec();
        individuals[0].metadata = Some(IndividualMetadata {
            pedigree_id: 11,
            age: 9,
        });
        donor.replace_individuals(individuals);

        let (merged, _) = merge_with_founders(&base, &donor, true).unwrap();
        assert_eq!(merged.individuals()[0].metadata.as_ref().unwrap().age, 9);
    }

    #[test]
    fn shared_divergence_is_diagnosed_not_opaque() {
        let base = host_record("h1", 11, 4.0, 500);
        let mut donor = host_record("h1", 11, 4.0, 600);
        // same founder genomes, but the donor hangs an extra edge between
        // them so the claimed-shared topology differs
        let mut nodes = donor.nodes().to_vec();
        nodes[1].time = 3.0;
        donor.replace_nodes(nodes);
        donor.add_edge(0.0, 10.0, 0, 1);
        donor.sort_edges();

        let node_map = vec![0, 1, NULL, NULL];
        match merge_tables(&base, &donor, &node_map, true) {
            Err(MergeError::SharedDivergence { summary }) => {
                assert!(summary.contains("nodes") || summary.contains("edges"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn split_merge_of_disjoint_records_is_additive() {
        let base = host_record("h1", 11, 4.0, 500);
        let donor = host_record("h2", 21, 4.0, 600);

        let (merged, trans) = merge_at_split(&base, &donor, Some(0.0), true).unwrap();
        assert_eq!(merged.num_nodes(), base.num_nodes() + donor.num_nodes());
        assert_eq!(merged.num_edges(), base.num_edges() + donor.num_edges());
        assert_eq!(&merged.nodes()[..4], base.nodes());
        assert!(trans.iter().all(|&t| t >= 4));
    }

    #[test]
    fn misaligned_clocks_are_rejected() {
        let base = host_record("h1", 11, 4.0, 500);
        let mut donor = host_record("h1", 11, 4.0, 600);
        donor.metadata.tick = 7;
        assert!(matches!(
            merge_with_founders(&base, &donor, true),
            Err(MergeError::TickMismatch { a: 0, b: 7 })
        ));
    }
}
