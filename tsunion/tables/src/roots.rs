//! Per-interval root queries. A node is rooted over the genomic intervals
//! where it carries ancestral material (it has children there, or is a
//! sample) but no edge attaches it to a parent.

use crate::intervals::{normalize, subtract};
use crate::tables::TableCollection;

impl TableCollection {
    /// The intervals over which `node` is a root.
    #[must_use]
    pub fn rooted_intervals(&self, node: i32) -> Vec<(f64, f64)> {
        let mut material: Vec<(f64, f64)> = self
            .edges()
            .iter()
            .filter(|e| e.parent == node)
            .map(|e| (e.left, e.right))
            .collect();
        if self.nodes()[node as usize].is_sample() {
            material.push((0.0, self.sequence_length()));
        }
        let material = normalize(material);

        let parent_cover = normalize(
            self.edges()
                .iter()
                .filter(|e| e.child == node)
                .map(|e| (e.left, e.right))
                .collect(),
        );

        subtract(&material, &parent_cover)
    }

    /// Every node that is a root over some interval, ascending.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn root_nodes(&self) -> Vec<i32> {
        (0..self.num_nodes() as i32)
            .filter(|&n| !self.rooted_intervals(n).is_empty())
            .collect()
    }
}
