//! The merge core: combines independently simulated ancestry records into
//! one consistent genealogy. Records are first placed on a shared clock,
//! then nodes denoting the same genome are identified by their stable ids,
//! the correspondence is closed over shared ancestors, the tables are
//! unioned with full reconciliation of registries and metadata, and any
//! false roots the partial overlap produced are repaired from the record
//! that knows their true ancestry.
//!
//! Every operation consumes its inputs read-only and produces a fresh
//! record; the only state threaded between merges is the identifier remap
//! log, which travels explicitly in each record's metadata.

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

#[macro_use]
extern crate log;

pub mod align;
pub mod error;
pub mod identity;
pub mod merge;
pub mod node_map;
pub mod phylogeny;
pub mod relabel;
pub mod repair;

pub use error::MergeError;
