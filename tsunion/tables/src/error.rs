use thiserror::Error;

#[allow(clippy::module_name_repetitions)]
#[derive(Error, Debug)]
pub enum TablesError {
    #[error(
        "edge {edge} carries the invalid interval [{left}, {right}) on a genome of length \
         {sequence_length}"
    )]
    BadEdgeInterval {
        edge: usize,
        left: f64,
        right: f64,
        sequence_length: f64,
    },
    #[error(
        "edge {edge}: parent {parent} (time {parent_time}) is not older than child {child} \
         (time {child_time})"
    )]
    EdgeTimeOrder {
        edge: usize,
        parent: i32,
        parent_time: f64,
        child: i32,
        child_time: f64,
    },
    #[error("{table} row {row} references {reference} {id}, which is out of bounds")]
    BadReference {
        table: &'static str,
        row: usize,
        reference: &'static str,
        id: i32,
    },
    #[error(
        "mutation {mutation} (time {time}) is younger than its node {node} (time {node_time})"
    )]
    MutationTimeOrder {
        mutation: usize,
        time: f64,
        node: i32,
        node_time: f64,
    },
    #[error(
        "child {child} has two parents, {parent_a} and {parent_b}, over the overlapping \
         interval [{left}, {right})"
    )]
    ParentAmbiguity {
        child: i32,
        parent_a: i32,
        parent_b: i32,
        left: f64,
        right: f64,
    },
    #[error("node map covers {map_len} nodes but the donor table has {num_nodes}")]
    NodeMapLength { map_len: usize, num_nodes: usize },
    #[error("cannot combine genomes of different lengths ({a} and {b})")]
    SequenceLengthMismatch { a: f64, b: f64 },
    #[error(
        "node map sends donor node {donor} to {base}, which is not a valid base node index"
    )]
    BadNodeMapEntry { donor: usize, base: i32 },
    #[error(
        "the {mapped} nodes declared shared by the node map carry different histories in the \
         two table collections"
    )]
    SharedDivergence { mapped: usize },
    #[error(
        "sites at position {position} disagree on the ancestral state ({a:?} and {b:?})"
    )]
    AncestralStateConflict { position: f64, a: String, b: String },
}
