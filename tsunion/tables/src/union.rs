//! The pairwise union primitive: grafts a donor table collection onto a
//! base collection through a node correspondence map.

use fnv::FnvHashMap;

use crate::error::TablesError;
use crate::tables::{TableCollection, NULL};

/// Behavior switches for [`TableCollection::union`].
#[derive(Clone, Copy, Debug)]
pub struct UnionOptions {
    /// Import donor populations as fresh rows instead of requiring the
    /// caller to have reconciled the two population tables positionally.
    pub add_populations: bool,
    /// Reject the union when the histories declared shared by the node map
    /// differ between the two collections.
    pub check_shared_equality: bool,
}

impl Default for UnionOptions {
    fn default() -> Self {
        Self {
            add_populations: true,
            check_shared_equality: true,
        }
    }
}

impl TableCollection {
    /// Checks that the sub-genealogies induced by the node map are the same
    /// history on both sides. Sample flags, population labels and
    /// record-level metadata are allowed to differ; times, stable ids,
    /// topology and mutations are not.
    #[allow(clippy::cast_possible_truncation)]
    fn shared_portions_equal(&self, other: &TableCollection, node_map: &[i32]) -> bool {
        let shared_donor: Vec<i32> = (0..node_map.len())
            .filter(|&i| node_map[i] != NULL)
            .map(|i| i as i32)
            .collect();
        let shared_base: Vec<i32> = shared_donor
            .iter()
            .map(|&i| node_map[i as usize])
            .collect();

        let (donor_sub, _) = other.subset(&shared_donor);
        let (base_sub, _) = self.subset(&shared_base);

        if donor_sub.num_nodes() != base_sub.num_nodes()
            || donor_sub.num_edges() != base_sub.num_edges()
            || donor_sub.num_mutations() != base_sub.num_mutations()
        {
            return false;
        }
        let nodes_agree = donor_sub
            .nodes()
            .iter()
            .zip(base_sub.nodes())
            .all(|(a, b)| a.time == b.time && a.metadata == b.metadata);
        let edges_agree = donor_sub.edges() == base_sub.edges();
        let sites_agree = donor_sub.sites() == base_sub.sites();
        let mutations_agree = donor_sub
            .mutations()
            .iter()
            .zip(base_sub.mutations())
            .all(|(a, b)| {
                a.site == b.site
                    && a.node == b.node
                    && a.time == b.time
                    && a.derived_state == b.derived_state
            });
        nodes_agree && edges_agree && sites_agree && mutations_agree
    }

    /// Adds to `self` every part of `other` that the node map does not
    /// identify with an existing row: unmapped nodes (with their
    /// individuals), edges touching at least one unmapped node, and all of
    /// `other`'s mutations (sites are deduplicated by position, mutations
    /// are not). Edges between two mapped nodes are taken to be shared
    /// history already present in `self`.
    ///
    /// Returns the complete donor-to-base node translation.
    ///
    /// # Errors
    ///
    /// Fails on genome length or node-map shape mismatches, on an
    /// ancestral-state conflict at a shared site, or — when
    /// `check_shared_equality` is set — with
    /// [`TablesError::SharedDivergence`] if the mapped portions differ.
    #[allow(clippy::cast_possible_truncation, clippy::too_many_lines)]
    pub fn union(
        &mut self,
        other: &TableCollection,
        node_map: &[i32],
        options: UnionOptions,
    ) -> Result<Vec<i32>, TablesError> {
        if self.sequence_length() != other.sequence_length() {
            return Err(TablesError::SequenceLengthMismatch {
                a: self.sequence_length(),
                b: other.sequence_length(),
            });
        }
        if node_map.len() != other.num_nodes() {
            return Err(TablesError::NodeMapLength {
                map_len: node_map.len(),
                num_nodes: other.num_nodes(),
            });
        }
        for (donor, &base) in node_map.iter().enumerate() {
            if base != NULL && (base < 0 || base as usize >= self.num_nodes()) {
                return Err(TablesError::BadNodeMapEntry { donor, base });
            }
        }

        if options.check_shared_equality && !self.shared_portions_equal(other, node_map) {
            let mapped = node_map.iter().filter(|&&m| m != NULL).count();
            return Err(TablesError::SharedDivergence { mapped });
        }

        let mut trans = node_map.to_vec();
        let mut pop_map: FnvHashMap<i32, i32> = FnvHashMap::default();
        let mut ind_map: FnvHashMap<i32, i32> = FnvHashMap::default();
        let mut added_individuals: Vec<(i32, i32)> = Vec::new();

        for (i, node) in other.nodes().iter().enumerate() {
            if node_map[i] != NULL {
                continue;
            }
            let population = if node.population == NULL {
                NULL
            } else if options.add_populations {
                *pop_map.entry(node.population).or_insert_with(|| {
                    self.add_population(
                        other.populations()[node.population as usize].metadata.clone(),
                    )
                })
            } else {
                if node.population as usize >= self.populations().len() {
                    return Err(TablesError::BadReference {
                        table: "node",
                        row: i,
                        reference: "population",
                        id: node.population,
                    });
                }
                node.population
            };
            let individual = if node.individual == NULL {
                NULL
            } else {
                *ind_map.entry(node.individual).or_insert_with(|| {
                    let ind = &other.individuals()[node.individual as usize];
                    let new = self.add_individual(ind.flags, Vec::new(), ind.metadata.clone());
                    added_individuals.push((node.individual, new));
                    new
                })
            };
            trans[i] = self.add_node(
                node.flags,
                node.time,
                population,
                individual,
                node.metadata.clone(),
            );
        }

        // parent references of imported individuals, where the parent came
        // over too
        let mut individuals = self.individuals().to_vec();
        for &(old, new) in &added_individuals {
            individuals[new as usize].parents = other.individuals()[old as usize]
                .parents
                .iter()
                .map(|&p| {
                    if p == NULL {
                        NULL
                    } else {
                        ind_map.get(&p).copied().unwrap_or(NULL)
                    }
                })
                .collect();
        }
        self.replace_individuals(individuals);

        for edge in other.edges() {
            if node_map[edge.parent as usize] != NULL && node_map[edge.child as usize] != NULL {
                continue;
            }
            self.add_edge(
                edge.left,
                edge.right,
                trans[edge.parent as usize],
                trans[edge.child as usize],
            );
        }

        let mut base_sites: FnvHashMap<u64, i32> = self
            .sites()
            .iter()
            .enumerate()
            .map(|(i, s)| (s.position.to_bits(), i as i32))
            .collect();
        let mut site_map = vec![NULL; other.sites().len()];
        for (i, site) in other.sites().iter().enumerate() {
            if let Some(&existing) = base_sites.get(&site.position.to_bits()) {
                if self.sites()[existing as usize].ancestral_state != site.ancestral_state {
                    return Err(TablesError::AncestralStateConflict {
                        position: site.position,
                        a: self.sites()[existing as usize].ancestral_state.clone(),
                        b: site.ancestral_state.clone(),
                    });
                }
                site_map[i] = existing;
            } else {
                let new = self.add_site(site.position, &site.ancestral_state);
                base_sites.insert(site.position.to_bits(), new);
                site_map[i] = new;
            }
        }

        let mut mut_map = vec![NULL; other.mutations().len()];
        for (i, mutation) in other.mutations().iter().enumerate() {
            mut_map[i] = self.add_mutation(
                site_map[mutation.site as usize],
                trans[mutation.node as usize],
                NULL,
                mutation.time,
                &mutation.derived_state,
                mutation.metadata.clone(),
            );
        }
        let mut mutations = self.mutations().to_vec();
        for (i, mutation) in other.mutations().iter().enumerate() {
            if mutation.parent != NULL {
                mutations[mut_map[i] as usize].parent = mut_map[mutation.parent as usize];
            }
        }
        self.replace_mutations(mutations);

        self.sort_edges();
        self.sort_mutations();

        Ok(trans)
    }
}
