//! Topology repair. A union through a partial overlap can leave nodes
//! rootless in the merged record even though one of the inputs knows their
//! parents: an edge between two mapped nodes is taken to be shared history
//! and is not imported, so a parent relation recorded only by the donor
//! side goes missing. Repair finds these false roots and reattaches them
//! from the record that carries their true ancestry.

use fnv::FnvHashSet;

use tsunion_tables::{intervals::clip, TableCollection, NULL};

use crate::error::MergeError;

/// What a repair run did: which nodes were reattached, and which were
/// certified unrootable and left as roots. Callers must not assume repair
/// is exhaustive.
#[derive(Clone, Debug, Default)]
pub struct RepairReport {
    pub reattached: Vec<i32>,
    pub unrootable: Vec<i32>,
    pub passes: usize,
}

/// Reattaches false roots in `merged` using edges found only in the
/// secondary input. `secondary_map` is the secondary-to-merged node
/// translation returned by the union.
///
/// True roots — nodes at the maximal time of either input — are left
/// alone. A queued node absent from the secondary input, or yielding no
/// importable edges over its rooted intervals, is certified unrootable,
/// logged, and excluded from further attempts; the queue only shrinks, so
/// the fixed point is reached in finitely many passes.
///
/// # Errors
///
/// Fails if an imported edge leaves the merged record structurally
/// inconsistent.
pub fn repair_false_roots(
    merged: &mut TableCollection,
    primary: &TableCollection,
    secondary: &TableCollection,
    secondary_map: &[i32],
) -> Result<RepairReport, MergeError> {
    let max_time = primary
        .nodes()
        .iter()
        .chain(secondary.nodes())
        .map(|n| n.time)
        .fold(f64::NEG_INFINITY, f64::max);

    let mut reverse = vec![NULL; merged.num_nodes()];
    for (s, &m) in secondary_map.iter().enumerate() {
        if m != NULL {
            #[allow(clippy::cast_possible_truncation)]
            {
                reverse[m as usize] = s as i32;
            }
        }
    }

    let mut report = RepairReport::default();
    let mut handled: FnvHashSet<i32> = FnvHashSet::default();

    loop {
        let pending: Vec<i32> = merged
            .root_nodes()
            .into_iter()
            .filter(|&n| merged.nodes()[n as usize].time != max_time)
            .filter(|n| !handled.contains(n))
            .collect();
        if pending.is_empty() {
            break;
        }
        report.passes += 1;

        let mut imported_any = false;
        for node in pending {
            handled.insert(node);
            let in_secondary = reverse[node as usize];
            if in_secondary == NULL {
                warn!(
                    "root {node} has no counterpart in the secondary input; certified \
                     unrootable"
                );
                report.unrootable.push(node);
                continue;
            }

            let rooted = merged.rooted_intervals(node);
            let mut imported = 0_usize;
            for edge in secondary.edges() {
                if edge.child != in_secondary {
                    continue;
                }
                for (left, right) in clip(edge.left, edge.right, &rooted) {
                    merged.add_edge(left, right, secondary_map[edge.parent as usize], node);
                    imported += 1;
                }
            }

            if imported == 0 {
                warn!("root {node} has no importable parent edges; certified unrootable");
                report.unrootable.push(node);
            } else {
                debug!("reattached root {node} through {imported} imported edges");
                report.reattached.push(node);
                imported_any = true;
            }
        }

        if imported_any {
            merged.sort_edges();
        } else {
            break;
        }
    }

    merged.check_integrity()?;
    Ok(report)
}
