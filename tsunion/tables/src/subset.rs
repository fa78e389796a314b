//! Structural subsetting and genomic interval slicing.

use crate::intervals::{clip, normalize};
use crate::tables::{EdgeRow, MutationRow, SiteRow, TableCollection, NULL};

impl TableCollection {
    /// Extracts the sub-genealogy induced by `keep` (in the given order),
    /// canonicalizing the population, individual and site tables to
    /// first-use order so that two subsets of equivalent histories compare
    /// equal row for row. Record-level metadata is not carried over.
    ///
    /// Returns the subset and the old-to-new node map.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::too_many_lines)]
    pub fn subset(&self, keep: &[i32]) -> (TableCollection, Vec<i32>) {
        let mut node_map = vec![NULL; self.num_nodes()];
        for (new, &old) in keep.iter().enumerate() {
            node_map[old as usize] = new as i32;
        }

        let mut out = TableCollection::new(self.sequence_length());

        let mut pop_map = vec![NULL; self.populations().len()];
        let mut ind_map = vec![NULL; self.individuals().len()];
        for &old in keep {
            let node = &self.nodes()[old as usize];
            if node.population != NULL && pop_map[node.population as usize] == NULL {
                pop_map[node.population as usize] =
                    out.add_population(self.populations()[node.population as usize].metadata.clone());
            }
            if node.individual != NULL && ind_map[node.individual as usize] == NULL {
                let ind = &self.individuals()[node.individual as usize];
                ind_map[node.individual as usize] =
                    out.add_individual(ind.flags, Vec::new(), ind.metadata.clone());
            }
        }
        // individual parent references, translated where the parent survives
        let mut individuals = out.individuals().to_vec();
        for (old, &new) in ind_map.iter().enumerate() {
            if new != NULL {
                individuals[new as usize].parents = self.individuals()[old]
                    .parents
                    .iter()
                    .map(|&p| if p == NULL { NULL } else { ind_map[p as usize] })
                    .collect();
            }
        }
        out.replace_individuals(individuals);

        for &old in keep {
            let node = &self.nodes()[old as usize];
            out.add_node(
                node.flags,
                node.time,
                if node.population == NULL {
                    NULL
                } else {
                    pop_map[node.population as usize]
                },
                if node.individual == NULL {
                    NULL
                } else {
                    ind_map[node.individual as usize]
                },
                node.metadata.clone(),
            );
        }

        let mut edges: Vec<EdgeRow> = self
            .edges()
            .iter()
            .filter(|e| node_map[e.parent as usize] != NULL && node_map[e.child as usize] != NULL)
            .map(|e| EdgeRow {
                left: e.left,
                right: e.right,
                parent: node_map[e.parent as usize],
                child: node_map[e.child as usize],
            })
            .collect();
        edges.sort_by(|a, b| {
            let ta = out.nodes()[a.parent as usize].time;
            let tb = out.nodes()[b.parent as usize].time;
            ta.total_cmp(&tb)
                .then_with(|| a.parent.cmp(&b.parent))
                .then_with(|| a.child.cmp(&b.child))
                .then_with(|| a.left.total_cmp(&b.left))
        });
        out.replace_edges(edges);

        // sites in position order, restricted to surviving mutations
        let mut kept_sites: Vec<usize> = self
            .mutations()
            .iter()
            .filter(|m| node_map[m.node as usize] != NULL)
            .map(|m| m.site as usize)
            .collect();
        kept_sites.sort_by(|&a, &b| {
            self.sites()[a]
                .position
                .total_cmp(&self.sites()[b].position)
                .then_with(|| a.cmp(&b))
        });
        kept_sites.dedup();
        let mut site_map = vec![NULL; self.sites().len()];
        let mut sites = Vec::with_capacity(kept_sites.len());
        for (new, &old) in kept_sites.iter().enumerate() {
            site_map[old] = new as i32;
            sites.push(SiteRow {
                position: self.sites()[old].position,
                ancestral_state: self.sites()[old].ancestral_state.clone(),
            });
        }
        out.replace_sites(sites);

        let mut mut_map = vec![NULL; self.mutations().len()];
        let mut mutations: Vec<MutationRow> = Vec::new();
        for (old, mutation) in self.mutations().iter().enumerate() {
            if node_map[mutation.node as usize] == NULL {
                continue;
            }
            mut_map[old] = mutations.len() as i32;
            mutations.push(MutationRow {
                site: site_map[mutation.site as usize],
                node: node_map[mutation.node as usize],
                parent: NULL,
                time: mutation.time,
                derived_state: mutation.derived_state.clone(),
                metadata: mutation.metadata.clone(),
            });
        }
        for (old, mutation) in self.mutations().iter().enumerate() {
            let new = mut_map[old];
            if new != NULL && mutation.parent != NULL {
                mutations[new as usize].parent = mut_map[mutation.parent as usize];
            }
        }
        out.replace_mutations(mutations);
        out.sort_mutations();

        (out, node_map)
    }

    /// Restricts the record to the given genomic intervals: edges are
    /// clipped, sites outside the cover are dropped along with their
    /// mutations. Node, individual and population tables are untouched.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn keep_intervals(&self, intervals: &[(f64, f64)]) -> TableCollection {
        let cover = normalize(intervals.to_vec());
        let mut out = self.clone();

        let mut edges = Vec::with_capacity(self.num_edges());
        for edge in self.edges() {
            for (left, right) in clip(edge.left, edge.right, &cover) {
                edges.push(EdgeRow {
                    left,
                    right,
                    parent: edge.parent,
                    child: edge.child,
                });
            }
        }
        out.replace_edges(edges);
        out.sort_edges();

        let mut site_map = vec![NULL; self.sites().len()];
        let mut sites = Vec::new();
        for (old, site) in self.sites().iter().enumerate() {
            if cover
                .iter()
                .any(|&(l, r)| site.position >= l && site.position < r)
            {
                site_map[old] = sites.len() as i32;
                sites.push(site.clone());
            }
        }
        out.replace_sites(sites);

        let mut mut_map = vec![NULL; self.mutations().len()];
        let mut mutations: Vec<MutationRow> = Vec::new();
        for (old, mutation) in self.mutations().iter().enumerate() {
            if site_map[mutation.site as usize] == NULL {
                continue;
            }
            mut_map[old] = mutations.len() as i32;
            let mut mutation = mutation.clone();
            mutation.site = site_map[mutation.site as usize];
            mutations.push(mutation);
        }
        for mutation in &mut mutations {
            if mutation.parent != NULL {
                mutation.parent = mut_map[mutation.parent as usize];
            }
        }
        out.replace_mutations(mutations);

        out
    }
}

#[cfg(test)]
mod tests {
    use crate::tables::{TableCollection, NODE_IS_SAMPLE, NULL};
    use crate::metadata::NodeMetadata;

    fn meta(slim_id: i64) -> Option<NodeMetadata> {
        Some(NodeMetadata {
            slim_id,
            is_vacant: false,
        })
    }

    fn two_pop_tables() -> TableCollection {
        let mut tables = TableCollection::new(10.0);
        tables.add_population(None);
        tables.add_population(None);
        tables.add_node(NODE_IS_SAMPLE, 0.0, 1, NULL, meta(1));
        tables.add_node(NODE_IS_SAMPLE, 0.0, 0, NULL, meta(2));
        tables.add_node(0, 1.0, 1, NULL, meta(3));
        tables.add_edge(0.0, 10.0, 2, 0);
        tables.add_edge(0.0, 10.0, 2, 1);
        let site = tables.add_site(4.0, "A");
        tables.add_mutation(site, 0, NULL, 0.5, "G", None);
        tables
    }

    #[test]
    fn subset_remaps_and_canonicalizes() {
        let tables = two_pop_tables();
        let (sub, node_map) = tables.subset(&[0, 2]);

        assert_eq!(node_map, vec![0, NULL, 1]);
        assert_eq!(sub.num_nodes(), 2);
        // only population 1 is referenced, and it becomes population 0
        assert_eq!(sub.populations().len(), 1);
        assert_eq!(sub.nodes()[0].population, 0);
        assert_eq!(sub.num_edges(), 1);
        assert_eq!(sub.edges()[0].parent, 1);
        assert_eq!(sub.edges()[0].child, 0);
        assert_eq!(sub.mutations().len(), 1);
        assert_eq!(sub.mutations()[0].node, 0);
    }

    #[test]
    fn equivalent_subsets_compare_equal() {
        let tables = two_pop_tables();

        // the same history recorded with shifted population indices and an
        // extra unreferenced site canonicalizes to the same subset
        let mut padded = TableCollection::new(10.0);
        padded.add_population(None);
        padded.add_population(None);
        padded.add_population(None);
        padded.add_node(NODE_IS_SAMPLE, 0.0, 2, NULL, meta(1));
        padded.add_node(NODE_IS_SAMPLE, 0.0, 1, NULL, meta(2));
        padded.add_node(0, 1.0, 2, NULL, meta(3));
        padded.add_edge(0.0, 10.0, 2, 0);
        padded.add_edge(0.0, 10.0, 2, 1);
        padded.add_site(2.0, "C");
        let site = padded.add_site(4.0, "A");
        padded.add_mutation(site, 0, NULL, 0.5, "G", None);

        let (a, _) = tables.subset(&[0, 2]);
        let (b, _) = padded.subset(&[0, 2]);
        assert_eq!(a, b);
    }

    #[test]
    fn keep_intervals_clips_edges_and_sites() {
        let tables = two_pop_tables();
        let sliced = tables.keep_intervals(&[(0.0, 3.0)]);
        assert_eq!(sliced.num_edges(), 2);
        assert!(sliced.edges().iter().all(|e| e.right <= 3.0));
        // the site at 4.0 falls outside the window
        assert!(sliced.sites().is_empty());
        assert!(sliced.mutations().is_empty());
        assert_eq!(sliced.num_nodes(), tables.num_nodes());
    }
}
