use thiserror::Error;

use tsunion_tables::TablesError;

/// Everything that can abort a pairwise merge. Each variant names the
/// offending key, node or index so the operator can inspect the source
/// records; none of these are retried.
#[allow(clippy::module_name_repetitions)]
#[derive(Error, Debug)]
pub enum MergeError {
    #[error(
        "the records disagree about their shared history: founder sets for group {key:?} are \
         {a:?} and {b:?}"
    )]
    FounderSetMismatch {
        key: String,
        a: Vec<i64>,
        b: Vec<i64>,
    },
    #[error("group {key:?} lists founder {pedigree_id}, which the record does not contain")]
    UnknownFounder { key: String, pedigree_id: i64 },
    #[error("anchor node counts differ: {a} in the base record, {b} in the donor record")]
    AnchorCountMismatch { a: usize, b: usize },
    #[error(
        "anchor times disagree: base node {base_node} at time {base_time}, donor node \
         {donor_node} at time {donor_time}"
    )]
    AnchorTimeMismatch {
        base_node: i32,
        base_time: f64,
        donor_node: i32,
        donor_time: f64,
    },
    #[error("ancestor closures differ in size: {a} base nodes against {b} donor nodes")]
    ClosureSizeMismatch { a: usize, b: usize },
    #[error(
        "matched ancestors diverge: base node {base_node} (stable id {base_id:?}, time \
         {base_time}) against donor node {donor_node} (stable id {donor_id:?}, time \
         {donor_time})"
    )]
    AncestorMismatch {
        base_node: i32,
        base_id: Option<i64>,
        base_time: f64,
        donor_node: i32,
        donor_id: Option<i64>,
        donor_time: f64,
    },
    #[error("the records sit on different clocks (ticks {a} and {b}); align them first")]
    TickMismatch { a: i64, b: i64 },
    #[error(
        "population table conflict at index {index}: both records carry non-placeholder \
         metadata that disagrees"
    )]
    PopulationConflict { index: usize },
    #[error("founding times disagree for group {key:?}: {a} and {b}")]
    FoundingTimeMismatch { key: String, a: i64, b: i64 },
    #[error(
        "identifier remap logs conflict at old id {old_id}, population {population}: one \
         record maps it to {a}, the other to {b}"
    )]
    RemapConflict {
        old_id: i64,
        population: i32,
        a: i64,
        b: i64,
    },
    #[error(
        "remapping with offset {offset} leaves {count} stable ids duplicated (first: \
         {first}); pick a larger offset"
    )]
    OffsetCollision { offset: i64, count: usize, first: i64 },
    #[error("the histories declared shared by the node map differ: {summary}")]
    SharedDivergence { summary: String },
    #[error(transparent)]
    Tables(#[from] TablesError),
}
