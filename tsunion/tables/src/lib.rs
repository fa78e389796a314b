//! Ancestry table collections: nodes, edges, individuals, populations,
//! sites and mutations, plus the structured top-level metadata document a
//! forward simulator writes alongside them.
//!
//! The layout is array-of-structs over integer-indexed arenas; every
//! transformation produces a new collection rather than mutating rows in
//! place. On top of the tables this crate provides the operations the merge
//! engine is built from: canonical sorting, integrity checking, structural
//! subsetting, interval slicing, simplification, per-interval root queries
//! and the pairwise union primitive.

#![deny(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::float_cmp
)]

mod error;
pub mod intervals;
mod io;
mod metadata;
mod roots;
mod simplify;
mod subset;
mod tables;
mod union;

pub use error::TablesError;
pub use metadata::{
    IndividualMetadata, MutationMetadata, NodeMetadata, PopulationMetadata, RemapLog,
    TopLevelMetadata, UserMetadata,
};
pub use tables::{
    EdgeRow, IndividualRow, MutationRow, NodeRow, PopulationRow, SiteRow, TableCollection,
    INDIVIDUAL_ALIVE, NODE_IS_SAMPLE, NULL,
};
pub use union::UnionOptions;
