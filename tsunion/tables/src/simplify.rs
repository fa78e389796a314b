//! Ancestral-segment simplification: reduce a table collection to the
//! history of a set of sample nodes, compressing unary paths and
//! renumbering nodes (samples first).

use crate::error::TablesError;
use crate::tables::{EdgeRow, MutationRow, SiteRow, TableCollection, NULL};

#[derive(Clone, Copy, Debug)]
struct Segment {
    left: f64,
    right: f64,
    /// Output node carrying this piece of ancestral material.
    node: i32,
}

fn fuse(mut segments: Vec<Segment>) -> Vec<Segment> {
    segments.sort_by(|a, b| a.left.total_cmp(&b.left));
    let mut out: Vec<Segment> = Vec::with_capacity(segments.len());
    for seg in segments {
        match out.last_mut() {
            Some(last) if last.node == seg.node && last.right == seg.left => {
                last.right = seg.right;
            }
            _ => out.push(seg),
        }
    }
    out
}

impl TableCollection {
    /// Simplifies the record down to `samples`, which become output nodes
    /// `0..samples.len()` in order. With `keep_input_roots`, history above
    /// the sample MRCAs is retained as compressed paths down from the input
    /// roots.
    ///
    /// Individual and population tables are carried over unchanged, so
    /// their indices stay valid. Mutations whose node survives are kept;
    /// parent links are preserved only where the parent mutation also
    /// survives.
    ///
    /// Returns the simplified collection and the old-to-new node map.
    ///
    /// # Errors
    ///
    /// Fails with a reference error if a sample id is out of bounds.
    #[allow(clippy::cast_possible_truncation, clippy::too_many_lines)]
    pub fn simplify(
        &self,
        samples: &[i32],
        keep_input_roots: bool,
    ) -> Result<(TableCollection, Vec<i32>), TablesError> {
        for (row, &s) in samples.iter().enumerate() {
            if s < 0 || s as usize >= self.num_nodes() {
                return Err(TablesError::BadReference {
                    table: "sample list",
                    row,
                    reference: "node",
                    id: s,
                });
            }
        }

        let mut out = TableCollection::new(self.sequence_length());
        out.metadata = self.metadata.clone();
        out.replace_populations(self.populations().to_vec());
        out.replace_individuals(self.individuals().to_vec());

        let mut node_map = vec![NULL; self.num_nodes()];
        let mut ancestry: Vec<Vec<Segment>> = vec![Vec::new(); self.num_nodes()];

        for &s in samples {
            let node = &self.nodes()[s as usize];
            let new = out.add_node(
                node.flags,
                node.time,
                node.population,
                node.individual,
                node.metadata.clone(),
            );
            node_map[s as usize] = new;
            ancestry[s as usize] = vec![Segment {
                left: 0.0,
                right: self.sequence_length(),
                node: new,
            }];
        }

        let mut retain = vec![false; self.num_nodes()];
        if keep_input_roots {
            for root in self.root_nodes() {
                retain[root as usize] = true;
            }
        }

        // visit parents in time order, children before parents
        let mut order: Vec<usize> = (0..self.num_edges()).collect();
        order.sort_by(|&a, &b| {
            let pa = self.edges()[a].parent;
            let pb = self.edges()[b].parent;
            self.nodes()[pa as usize]
                .time
                .total_cmp(&self.nodes()[pb as usize].time)
                .then_with(|| pa.cmp(&pb))
        });

        let mut edge_buffer: Vec<EdgeRow> = Vec::new();
        let mut i = 0;
        while i < order.len() {
            let parent = self.edges()[order[i]].parent;
            let mut group_end = i;
            while group_end < order.len() && self.edges()[order[group_end]].parent == parent {
                group_end += 1;
            }

            let mut segments: Vec<Segment> = std::mem::take(&mut ancestry[parent as usize]);
            for &e in &order[i..group_end] {
                let edge = &self.edges()[e];
                for seg in &ancestry[edge.child as usize] {
                    let left = seg.left.max(edge.left);
                    let right = seg.right.min(edge.right);
                    if left < right {
                        segments.push(Segment {
                            left,
                            right,
                            node: seg.node,
                        });
                    }
                }
            }
            i = group_end;

            if segments.is_empty() {
                continue;
            }

            let mut bounds: Vec<f64> = segments
                .iter()
                .flat_map(|s| [s.left, s.right])
                .collect();
            bounds.sort_by(f64::total_cmp);
            bounds.dedup();

            let mut merged: Vec<Segment> = Vec::new();
            for window in bounds.windows(2) {
                let (left, right) = (window[0], window[1]);
                let covering: Vec<i32> = segments
                    .iter()
                    .filter(|s| s.left < right && s.right > left)
                    .map(|s| s.node)
                    .collect();
                if covering.is_empty() {
                    continue;
                }
                if covering.len() == 1 && !retain[parent as usize] {
                    merged.push(Segment {
                        left,
                        right,
                        node: covering[0],
                    });
                    continue;
                }
                if node_map[parent as usize] == NULL {
                    let node = &self.nodes()[parent as usize];
                    node_map[parent as usize] = out.add_node(
                        node.flags,
                        node.time,
                        node.population,
                        node.individual,
                        node.metadata.clone(),
                    );
                }
                let mapped = node_map[parent as usize];
                for child in covering {
                    if child != mapped {
                        edge_buffer.push(EdgeRow {
                            left,
                            right,
                            parent: mapped,
                            child,
                        });
                    }
                }
                merged.push(Segment {
                    left,
                    right,
                    node: mapped,
                });
            }
            ancestry[parent as usize] = fuse(merged);
        }

        // squash abutting pieces of the same parent-child relation
        edge_buffer.sort_by(|a, b| {
            a.parent
                .cmp(&b.parent)
                .then_with(|| a.child.cmp(&b.child))
                .then_with(|| a.left.total_cmp(&b.left))
        });
        let mut edges: Vec<EdgeRow> = Vec::with_capacity(edge_buffer.len());
        for edge in edge_buffer {
            match edges.last_mut() {
                Some(last)
                    if last.parent == edge.parent
                        && last.child == edge.child
                        && last.right == edge.left =>
                {
                    last.right = edge.right;
                }
                _ => edges.push(edge),
            }
        }
        out.replace_edges(edges);
        out.sort_edges();

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
        let mut sites: Vec<SiteRow> = Vec::with_capacity(kept_sites.len());
        for (new, &old) in kept_sites.iter().enumerate() {
            site_map[old] = new as i32;
            sites.push(self.sites()[old].clone());
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

        Ok((out, node_map))
    }
}
