//! The table collection: an arena of integer-indexed rows describing a
//! genealogy. Node and edge tables carry the ancestry DAG, individuals group
//! genome copies, sites and mutations carry sequence variation, and the
//! top-level metadata document carries the simulation clock and registries.

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

use crate::error::TablesError;
use crate::metadata::{
    IndividualMetadata, MutationMetadata, NodeMetadata, PopulationMetadata, TopLevelMetadata,
};

/// Sentinel for an unset table reference.
pub const NULL: i32 = -1;

/// Node flag: this genome was sampled.
pub const NODE_IS_SAMPLE: u32 = 1 << 0;

/// Individual flag: the individual was alive when the record was written.
pub const INDIVIDUAL_ALIVE: u32 = 1 << 16;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRow {
    pub flags: u32,
    pub time: f64,
    pub population: i32,
    pub individual: i32,
    pub metadata: Option<NodeMetadata>,
}

impl NodeRow {
    #[must_use]
    pub fn is_sample(&self) -> bool {
        self.flags & NODE_IS_SAMPLE != 0
    }

    /// The simulator-assigned stable id, if any.
    #[must_use]
    pub fn slim_id(&self) -> Option<i64> {
        self.metadata.as_ref().map(|m| m.slim_id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeRow {
    pub left: f64,
    pub right: f64,
    pub parent: i32,
    pub child: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SiteRow {
    pub position: f64,
    pub ancestral_state: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MutationRow {
    pub site: i32,
    pub node: i32,
    pub parent: i32,
    pub time: f64,
    pub derived_state: String,
    pub metadata: Option<MutationMetadata>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndividualRow {
    pub flags: u32,
    pub parents: Vec<i32>,
    pub metadata: Option<IndividualMetadata>,
}

impl IndividualRow {
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.flags & INDIVIDUAL_ALIVE != 0
    }

    #[must_use]
    pub fn pedigree_id(&self) -> Option<i64> {
        self.metadata.as_ref().map(|m| m.pedigree_id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PopulationRow {
    pub metadata: Option<PopulationMetadata>,
}

impl PopulationRow {
    /// Populations without metadata are placeholders.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.metadata.is_none()
    }
}

/// A complete ancestry record.
///
/// Transformations never mutate rows in place; they copy rows out, rebuild,
/// and replace whole tables, so a collection handed to a consumer stays
/// internally consistent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableCollection {
    sequence_length: f64,
    nodes: Vec<NodeRow>,
    edges: Vec<EdgeRow>,
    sites: Vec<SiteRow>,
    mutations: Vec<MutationRow>,
    individuals: Vec<IndividualRow>,
    populations: Vec<PopulationRow>,
    pub metadata: TopLevelMetadata,
}

#[allow(clippy::cast_possible_truncation)]
fn last_id(len: usize) -> i32 {
    (len - 1) as i32
}

impl TableCollection {
    #[must_use]
    pub fn new(sequence_length: f64) -> Self {
        Self {
            sequence_length,
            nodes: Vec::new(),
            edges: Vec::new(),
            sites: Vec::new(),
            mutations: Vec::new(),
            individuals: Vec::new(),
            populations: Vec::new(),
            metadata: TopLevelMetadata::default(),
        }
    }

    #[must_use]
    pub fn sequence_length(&self) -> f64 {
        self.sequence_length
    }

    pub fn add_node(
        &mut self,
        flags: u32,
        time: f64,
        population: i32,
        individual: i32,
        metadata: Option<NodeMetadata>,
    ) -> i32 {
        self.nodes.push(NodeRow {
            flags,
            time,
            population,
            individual,
            metadata,
        });
        last_id(self.nodes.len())
    }

    pub fn add_edge(&mut self, left: f64, right: f64, parent: i32, child: i32) -> i32 {
        self.edges.push(EdgeRow {
            left,
            right,
            parent,
            child,
        });
        last_id(self.edges.len())
    }

    pub fn add_site(&mut self, position: f64, ancestral_state: &str) -> i32 {
        self.sites.push(SiteRow {
            position,
            ancestral_state: ancestral_state.to_owned(),
        });
        last_id(self.sites.len())
    }

    pub fn add_mutation(
        &mut self,
        site: i32,
        node: i32,
        parent: i32,
        time: f64,
        derived_state: &str,
        metadata: Option<MutationMetadata>,
    ) -> i32 {
        self.mutations.push(MutationRow {
            site,
            node,
            parent,
            time,
            derived_state: derived_state.to_owned(),
            metadata,
        });
        last_id(self.mutations.len())
    }

    pub fn add_individual(
        &mut self,
        flags: u32,
        parents: Vec<i32>,
        metadata: Option<IndividualMetadata>,
    ) -> i32 {
        self.individuals.push(IndividualRow {
            flags,
            parents,
            metadata,
        });
        last_id(self.individuals.len())
    }

    pub fn add_population(&mut self, metadata: Option<PopulationMetadata>) -> i32 {
        self.populations.push(PopulationRow { metadata });
        last_id(self.populations.len())
    }

    #[must_use]
    pub fn nodes(&self) -> &[NodeRow] {
        &self.nodes
    }

    #[must_use]
    pub fn edges(&self) -> &[EdgeRow] {
        &self.edges
    }

    #[must_use]
    pub fn sites(&self) -> &[SiteRow] {
        &self.sites
    }

    #[must_use]
    pub fn mutations(&self) -> &[MutationRow] {
        &self.mutations
    }

    #[must_use]
    pub fn individuals(&self) -> &[IndividualRow] {
        &self.individuals
    }

    #[must_use]
    pub fn populations(&self) -> &[PopulationRow] {
        &self.populations
    }

    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn num_mutations(&self) -> usize {
        self.mutations.len()
    }

    pub fn replace_nodes(&mut self, nodes: Vec<NodeRow>) {
        self.nodes = nodes;
    }

    pub fn replace_edges(&mut self, edges: Vec<EdgeRow>) {
        self.edges = edges;
    }

    pub fn replace_sites(&mut self, sites: Vec<SiteRow>) {
        self.sites = sites;
    }

    pub fn replace_mutations(&mut self, mutations: Vec<MutationRow>) {
        self.mutations = mutations;
    }

    pub fn replace_individuals(&mut self, individuals: Vec<IndividualRow>) {
        self.individuals = individuals;
    }

    pub fn replace_populations(&mut self, populations: Vec<PopulationRow>) {
        self.populations = populations;
    }

    /// Sorts edges into the canonical order: parent time, then parent id,
    /// then child id, then left coordinate.
    pub fn sort_edges(&mut self) {
        let times: Vec<f64> = self.nodes.iter().map(|n| n.time).collect();
        self.edges.sort_by(|a, b| {
            times[a.parent as usize]
                .total_cmp(&times[b.parent as usize])
                .then_with(|| a.parent.cmp(&b.parent))
                .then_with(|| a.child.cmp(&b.child))
                .then_with(|| a.left.total_cmp(&b.left))
        });
    }

    /// Sorts mutations by site position, then by descending time, so parent
    /// mutations precede their descendants within a site.
    pub fn sort_mutations(&mut self) {
        let positions: Vec<f64> = self.sites.iter().map(|s| s.position).collect();
        self.mutations.sort_by(|a, b| {
            positions[a.site as usize]
                .total_cmp(&positions[b.site as usize])
                .then_with(|| b.time.total_cmp(&a.time))
        });
    }

    /// Maps each individual to the nodes it owns, in node-id order.
    #[must_use]
    pub fn individual_nodes(&self) -> Vec<Vec<i32>> {
        let mut out = vec![Vec::new(); self.individuals.len()];
        for (id, node) in self.nodes.iter().enumerate() {
            if node.individual != NULL {
                out[node.individual as usize].push(last_id(id + 1));
            }
        }
        out
    }

    /// Maps pedigree ids to individual table indices.
    #[must_use]
    pub fn pedigree_index(&self) -> FnvHashMap<i64, usize> {
        self.individuals
            .iter()
            .enumerate()
            .filter_map(|(i, ind)| ind.pedigree_id().map(|p| (p, i)))
            .collect()
    }

    fn check_node_ref(
        &self,
        table: &'static str,
        row: usize,
        id: i32,
    ) -> Result<(), TablesError> {
        if id < 0 || id as usize >= self.nodes.len() {
            return Err(TablesError::BadReference {
                table,
                row,
                reference: "node",
                id,
            });
        }
        Ok(())
    }

    /// Validates every structural invariant of the collection.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant: an out-of-bounds reference, an
    /// invalid edge interval, a child at least as old as its parent, a
    /// mutation younger than its node, or two parents claiming the same
    /// child over overlapping intervals.
    #[allow(clippy::too_many_lines)]
    pub fn check_integrity(&self) -> Result<(), TablesError> {
        for (row, node) in self.nodes.iter().enumerate() {
            if node.population != NULL
                && (node.population < 0 || node.population as usize >= self.populations.len())
            {
                return Err(TablesError::BadReference {
                    table: "node",
                    row,
                    reference: "population",
                    id: node.population,
                });
            }
            if node.individual != NULL
                && (node.individual < 0 || node.individual as usize >= self.individuals.len())
            {
                return Err(TablesError::BadReference {
                    table: "node",
                    row,
                    reference: "individual",
                    id: node.individual,
                });
            }
        }

        let mut edges_per_child: FnvHashMap<i32, Vec<(f64, f64, i32)>> = FnvHashMap::default();
        for (row, edge) in self.edges.iter().enumerate() {
            self.check_node_ref("edge", row, edge.parent)?;
            self.check_node_ref("edge", row, edge.child)?;
            if !(edge.left >= 0.0
                && edge.left < edge.right
                && edge.right <= self.sequence_length)
            {
                return Err(TablesError::BadEdgeInterval {
                    edge: row,
                    left: edge.left,
                    right: edge.right,
                    sequence_length: self.sequence_length,
                });
            }
            let parent_time = self.nodes[edge.parent as usize].time;
            let child_time = self.nodes[edge.child as usize].time;
            if parent_time <= child_time {
                return Err(TablesError::EdgeTimeOrder {
                    edge: row,
                    parent: edge.parent,
                    parent_time,
                    child: edge.child,
                    child_time,
                });
            }
            edges_per_child
                .entry(edge.child)
                .or_default()
                .push((edge.left, edge.right, edge.parent));
        }

        for (child, mut intervals) in edges_per_child {
            intervals.sort_by(|a, b| a.0.total_cmp(&b.0));
            let mut active: Vec<(f64, i32)> = Vec::new();
            for (left, right, parent) in intervals {
                active.retain(|&(r, _)| r > left);
                if let Some(&(r, other)) = active.iter().find(|&&(_, p)| p != parent) {
                    return Err(TablesError::ParentAmbiguity {
                        child,
                        parent_a: other,
                        parent_b: parent,
                        left,
                        right: right.min(r),
                    });
                }
                active.push((right, parent));
            }
        }

        for (row, mutation) in self.mutations.iter().enumerate() {
            self.check_node_ref("mutation", row, mutation.node)?;
            if mutation.site < 0 || mutation.site as usize >= self.sites.len() {
                return Err(TablesError::BadReference {
                    table: "mutation",
                    row,
                    reference: "site",
                    id: mutation.site,
                });
            }
            if mutation.parent != NULL
                && (mutation.parent < 0 || mutation.parent as usize >= self.mutations.len())
            {
                return Err(TablesError::BadReference {
                    table: "mutation",
                    row,
                    reference: "mutation",
                    id: mutation.parent,
                });
            }
            let node_time = self.nodes[mutation.node as usize].time;
            if mutation.time < node_time {
                return Err(TablesError::MutationTimeOrder {
                    mutation: row,
                    time: mutation.time,
                    node: mutation.node,
                    node_time,
                });
            }
        }

        for (row, individual) in self.individuals.iter().enumerate() {
            for &parent in &individual.parents {
                if parent != NULL
                    && (parent < 0 || parent as usize >= self.individuals.len())
                {
                    return Err(TablesError::BadReference {
                        table: "individual",
                        row,
                        reference: "individual",
                        id: parent,
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{TableCollection, NODE_IS_SAMPLE, NULL};
    use crate::error::TablesError;
    use crate::metadata::NodeMetadata;

    fn meta(slim_id: i64) -> Option<NodeMetadata> {
        Some(NodeMetadata {
            slim_id,
            is_vacant: false,
        })
    }

    /// Two samples coalescing into one parent, plus a root above it.
    pub(crate) fn three_generations() -> TableCollection {
        let mut tables = TableCollection::new(10.0);
        tables.add_population(None);
        tables.add_node(NODE_IS_SAMPLE, 0.0, 0, NULL, meta(100));
        tables.add_node(NODE_IS_SAMPLE, 0.0, 0, NULL, meta(101));
        tables.add_node(0, 1.0, 0, NULL, meta(50));
        tables.add_node(0, 2.0, 0, NULL, meta(10));
        tables.add_edge(0.0, 10.0, 2, 0);
        tables.add_edge(0.0, 10.0, 2, 1);
        tables.add_edge(0.0, 10.0, 3, 2);
        tables
    }

    #[test]
    fn integrity_accepts_valid_tables() {
        three_generations().check_integrity().unwrap();
    }

    #[test]
    fn integrity_rejects_inverted_edge_times() {
        let mut tables = three_generations();
        tables.add_edge(0.0, 10.0, 0, 3);
        assert!(matches!(
            tables.check_integrity(),
            Err(TablesError::EdgeTimeOrder { .. })
        ));
    }

    #[test]
    fn integrity_rejects_parent_ambiguity() {
        let mut tables = three_generations();
        let other = tables.add_node(0, 1.5, 0, NULL, meta(60));
        tables.add_edge(5.0, 10.0, other, 0);
        // node 0 already has parent 2 over [0, 10)
        assert!(matches!(
            tables.check_integrity(),
            Err(TablesError::ParentAmbiguity { child: 0, .. })
        ));
    }

    #[test]
    fn integrity_allows_disjoint_parents() {
        let mut tables = three_generations();
        tables.replace_edges(
            tables
                .edges()
                .iter()
                .map(|e| {
                    let mut e = e.clone();
                    if e.child == 0 {
                        e.right = 5.0;
                    }
                    e
                })
                .collect(),
        );
        let other = tables.add_node(0, 1.5, 0, NULL, meta(60));
        tables.add_edge(5.0, 10.0, other, 0);
        tables.check_integrity().unwrap();
    }

    #[test]
    fn sort_edges_orders_by_parent_time() {
        let mut tables = three_generations();
        let edges: Vec<_> = tables.edges().iter().rev().cloned().collect();
        tables.replace_edges(edges);
        tables.sort_edges();
        let parents: Vec<i32> = tables.edges().iter().map(|e| e.parent).collect();
        assert_eq!(parents, vec![2, 2, 3]);
    }
}
