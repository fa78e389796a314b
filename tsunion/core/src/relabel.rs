//! Stable-id collision resolution. Parallel simulation streams assign
//! stable ids independently, so two records can hand the same id to
//! unrelated genomes. Before such records may be unioned, one side's ids
//! are deterministically moved out of the way and the move is logged so a
//! later merge partner can apply the same relabelling.

use fnv::{FnvHashMap, FnvHashSet};

use tsunion_tables::{RemapLog, TableCollection, NULL};

use crate::error::MergeError;
use crate::merge::merge_remap_logs;

/// Rewrites node stable ids according to `plan` (node id to new stable id)
/// and propagates the change to the owning individuals' pedigree ids and
/// the founder registry. The pedigree offset is halved because an
/// individual owns two genomes.
fn relabel(tables: &TableCollection, plan: &FnvHashMap<i32, i64>, offset: i64) -> TableCollection {
    let mut out = tables.clone();

    let mut individual_updates: FnvHashMap<i32, i64> = FnvHashMap::default();
    let mut nodes = tables.nodes().to_vec();
    #[allow(clippy::cast_possible_truncation)]
    for (i, node) in nodes.iter_mut().enumerate() {
        let Some(&new_id) = plan.get(&(i as i32)) else {
            continue;
        };
        let Some(meta) = &mut node.metadata else {
            continue;
        };
        let old_id = meta.slim_id;
        meta.slim_id = new_id;
        if node.individual != NULL {
            individual_updates.insert(node.individual, old_id);
        }
    }
    out.replace_nodes(nodes);

    if individual_updates.is_empty() {
        return out;
    }

    let mut pedigree_relabels: FnvHashMap<i64, i64> = FnvHashMap::default();
    let mut individuals = tables.individuals().to_vec();
    for (&individual, &old_node_id) in &individual_updates {
        let row = &mut individuals[individual as usize];
        let Some(meta) = &mut row.metadata else {
            continue;
        };
        let population = i64::from(
            tables
                .nodes()
                .iter()
                .find(|n| n.individual == individual)
                .map_or(0, |n| n.population),
        );
        let new_pedigree = (old_node_id + population * offset) / 2;
        pedigree_relabels.insert(meta.pedigree_id, new_pedigree);
        meta.pedigree_id = new_pedigree;
    }
    out.replace_individuals(individuals);

    for founder_set in out.metadata.user.founders.values_mut() {
        for pedigree_id in founder_set.iter_mut() {
            if let Some(&new) = pedigree_relabels.get(pedigree_id) {
                *pedigree_id = new;
            }
        }
    }

    out
}

fn duplicate_ids(tables: &TableCollection) -> Vec<(i64, usize)> {
    let mut counts: FnvHashMap<i64, usize> = FnvHashMap::default();
    for node in tables.nodes() {
        if let Some(sid) = node.slim_id() {
            *counts.entry(sid).or_default() += 1;
        }
    }
    let mut out: Vec<(i64, usize)> = counts.into_iter().filter(|&(_, c)| c > 1).collect();
    out.sort_unstable();
    out
}

/// Detects stable ids assigned to more than one node and moves every
/// occurrence after the first to `old_id + population * offset`, recording
/// each move in the record's remap log.
///
/// The offset is the caller's responsibility, but its adequacy is checked:
/// if any duplicate survives the relabelling, the resolution fails rather
/// than silently producing a mergeable-looking record.
///
/// # Errors
///
/// Fails with [`MergeError::OffsetCollision`] when the offset was too
/// small, or with [`MergeError::RemapConflict`] when the new entries
/// contradict the log the record already carries.
pub fn resolve_id_collisions(
    tables: &TableCollection,
    offset: i64,
) -> Result<(TableCollection, RemapLog), MergeError> {
    let mut first_seen: FnvHashSet<i64> = FnvHashSet::default();
    let mut plan: FnvHashMap<i32, i64> = FnvHashMap::default();
    let mut log = RemapLog::new();

    #[allow(clippy::cast_possible_truncation)]
    for (i, node) in tables.nodes().iter().enumerate() {
        let Some(sid) = node.slim_id() else { continue };
        if first_seen.insert(sid) {
            continue;
        }
        let new_id = sid + i64::from(node.population) * offset;
        plan.insert(i as i32, new_id);
        log.entry(sid).or_default().insert(node.population, new_id);
    }

    if plan.is_empty() {
        return Ok((tables.clone(), log));
    }
    info!(
        "remapping {} duplicated stable ids with offset {offset}",
        log.len()
    );

    let mut out = relabel(tables, &plan, offset);
    out.metadata.user.id_remaps = merge_remap_logs(&out.metadata.user.id_remaps, &log)?;

    let residual = duplicate_ids(&out);
    if let Some(&(first, _)) = residual.first() {
        return Err(MergeError::OffsetCollision {
            offset,
            count: residual.len(),
            first,
        });
    }

    Ok((out, log))
}

/// Applies a merge partner's remap log to this record: any node whose
/// stable id and population appear in the log is relabelled the same way,
/// so both records agree on ids before their union.
#[must_use]
pub fn apply_remaps(
    tables: &TableCollection,
    log: &RemapLog,
    offset: i64,
) -> TableCollection {
    let mut plan: FnvHashMap<i32, i64> = FnvHashMap::default();
    #[allow(clippy::cast_possible_truncation)]
    for (i, node) in tables.nodes().iter().enumerate() {
        let Some(sid) = node.slim_id() else { continue };
        if let Some(&new_id) = log.get(&sid).and_then(|m| m.get(&node.population)) {
            plan.insert(i as i32, new_id);
        }
    }
    if plan.is_empty() {
        return tables.clone();
    }
    relabel(tables, &plan, offset)
}

/// Recovers the offset a remap log was produced with, the way a record
/// that only carries the log can: `(new - old) / population` for any entry
/// of a nonzero population.
#[must_use]
pub fn infer_offset(log: &RemapLog) -> Option<i64> {
    for (&old_id, inner) in log {
        for (&population, &new_id) in inner {
            if population != 0 {
                return Some((new_id - old_id) / i64::from(population));
            }
        }
    }
    None
}
