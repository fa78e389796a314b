//! Clock alignment. Independently simulated records each count time from
//! their own start; before any cross-record comparison their node and
//! mutation times must be placed on one shared timeline.

use tsunion_tables::{TableCollection, INDIVIDUAL_ALIVE, NODE_IS_SAMPLE, NULL};

/// Adds `dt` ticks to every node time, every mutation time and the
/// top-level clock. Topology, populations and individual flags are
/// untouched; negative offsets are legal.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn shift_times(tables: &TableCollection, dt: i64) -> TableCollection {
    let mut out = tables.clone();

    let mut nodes = tables.nodes().to_vec();
    for node in &mut nodes {
        node.time += dt as f64;
    }
    out.replace_nodes(nodes);

    let mut mutations = tables.mutations().to_vec();
    for mutation in &mut mutations {
        mutation.time += dt as f64;
    }
    out.replace_mutations(mutations);

    out.metadata.tick += dt;
    out.metadata.cycle += dt;
    out
}

/// True for each individual that was alive `at` ticks before the record
/// was written: born at or before that time, and not yet dead. Birth time
/// is the time of the individual's nodes; the death time follows from the
/// recorded age.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn individuals_alive_at(tables: &TableCollection, at: i64) -> Vec<bool> {
    let mut birth = vec![f64::NAN; tables.individuals().len()];
    for node in tables.nodes() {
        if node.individual != NULL {
            birth[node.individual as usize] = node.time;
        }
    }

    tables
        .individuals()
        .iter()
        .enumerate()
        .map(|(i, ind)| {
            let Some(meta) = &ind.metadata else {
                return false;
            };
            let born = birth[i];
            !born.is_nan() && born >= at as f64 && born - meta.age as f64 <= at as f64
        })
        .collect()
}

/// Rewinds the record to what the simulator would have written at `tick`:
/// shifts all times accordingly, resets the clock metadata, and recomputes
/// every individual's alive flag at that tick.
#[must_use]
pub fn reset_time(tables: &TableCollection, tick: i64) -> TableCollection {
    let dt = tables.metadata.tick - tick;
    let alive = individuals_alive_at(tables, dt);

    let mut out = shift_times(tables, -dt);
    let mut individuals = out.individuals().to_vec();
    for (i, ind) in individuals.iter_mut().enumerate() {
        if alive[i] {
            ind.flags |= INDIVIDUAL_ALIVE;
        } else {
            ind.flags &= !INDIVIDUAL_ALIVE;
        }
    }
    out.replace_individuals(individuals);
    out
}

/// Strips the alive flag from every individual. Two records of the same
/// process restarted at different points disagree about who is currently
/// alive; clearing the flag on both sides removes the contradiction before
/// their union.
#[must_use]
pub fn clear_alive(tables: &TableCollection) -> TableCollection {
    let mut out = tables.clone();
    let mut individuals = tables.individuals().to_vec();
    for ind in &mut individuals {
        ind.flags &= !INDIVIDUAL_ALIVE;
    }
    out.replace_individuals(individuals);
    out
}

/// Clears the sample flag on vacant placeholder nodes so they do not take
/// part in downstream simplification.
#[must_use]
pub fn strip_vacant_samples(tables: &TableCollection) -> TableCollection {
    let mut out = tables.clone();
    let mut nodes = tables.nodes().to_vec();
    let mut stripped = 0_usize;
    for node in &mut nodes {
        if node.metadata.as_ref().is_some_and(|m| m.is_vacant) {
            node.flags &= !NODE_IS_SAMPLE;
            stripped += 1;
        }
    }
    if stripped > 0 {
        debug!("cleared the sample flag on {stripped} vacant nodes");
    }
    out.replace_nodes(nodes);
    out
}

#[cfg(test)]
mod tests {
    use super::{clear_alive, reset_time, shift_times, strip_vacant_samples};
    use tsunion_tables::{
        IndividualMetadata, NodeMetadata, TableCollection, INDIVIDUAL_ALIVE, NODE_IS_SAMPLE, NULL,
    };

    fn record() -> TableCollection {
        let mut tables = TableCollection::new(10.0);
        tables.add_population(None);
        // individual 0 born 8 ticks ago, lived 3 ticks
        tables.add_individual(
            0,
            vec![],
            Some(IndividualMetadata {
                pedigree_id: 4,
                age: 3,
            }),
        );
        // individual 1 born 2 ticks ago, alive when written out
        tables.add_individual(
            INDIVIDUAL_ALIVE,
            vec![],
            Some(IndividualMetadata {
                pedigree_id: 5,
                age: 2,
            }),
        );
        tables.add_node(
            0,
            8.0,
            0,
            0,
            Some(NodeMetadata {
                slim_id: 8,
                is_vacant: false,
            }),
        );
        tables.add_node(
            NODE_IS_SAMPLE,
            2.0,
            0,
            1,
            Some(NodeMetadata {
                slim_id: 10,
                is_vacant: false,
            }),
        );
        tables.add_edge(0.0, 10.0, 0, 1);
        let site = tables.add_site(1.0, "A");
        tables.add_mutation(site, 1, NULL, 3.0, "T", None);
        tables.metadata.tick = 20;
        tables.metadata.cycle = 20;
        tables
    }

    #[test]
    fn shift_round_trip_is_exact() {
        let tables = record();
        let back = shift_times(&shift_times(&tables, 7), -7);
        assert_eq!(back, tables);
    }

    #[test]
    fn shift_adjusts_times_and_clock() {
        let shifted = shift_times(&record(), 5);
        assert_eq!(shifted.nodes()[0].time, 13.0);
        assert_eq!(shifted.mutations()[0].time, 8.0);
        assert_eq!(shifted.metadata.tick, 25);
        // topology and flags untouched
        assert_eq!(shifted.edges(), record().edges());
        assert_eq!(shifted.individuals(), record().individuals());
    }

    #[test]
    fn reset_recomputes_alive_flags() {
        let tables = record();
        // at tick 14 (6 ticks ago) individual 0 was alive, individual 1 not
        // yet born
        let reset = reset_time(&tables, 14);
        assert_eq!(reset.metadata.tick, 14);
        assert!(reset.individuals()[0].is_alive());
        assert!(!reset.individuals()[1].is_alive());
        assert_eq!(reset.nodes()[0].time, 2.0);

        // and resetting back to the original tick restores the record
        let back = reset_time(&reset, 20);
        assert_eq!(back, tables);
    }

    #[test]
    fn clear_alive_strips_every_flag() {
        let cleared = clear_alive(&record());
        assert!(cleared.individuals().iter().all(|i| !i.is_alive()));
    }

    #[test]
    fn vacant_nodes_lose_their_sample_flag() {
        let mut tables = record();
        let mut nodes = tables.nodes().to_vec();
        nodes[1].metadata.as_mut().unwrap().is_vacant = true;
        tables.replace_nodes(nodes);

        let stripped = strip_vacant_samples(&tables);
        assert!(!stripped.nodes()[1].is_sample());
        assert_eq!(stripped.nodes()[0].flags, tables.nodes()[0].flags);
    }
}
