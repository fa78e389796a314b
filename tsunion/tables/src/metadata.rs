//! Typed views of the metadata records a forward simulator attaches to its
//! output: per-row metadata for nodes, individuals, populations and
//! mutations, and the structured top-level document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-node metadata.
///
/// `slim_id` is the identifier the simulator assigned to this genome; it is
/// the only handle that is comparable across independently produced table
/// collections. `is_vacant` marks placeholder genomes written out by
/// simplification-aware simulators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub slim_id: i64,
    #[serde(default)]
    pub is_vacant: bool,
}

/// Per-individual metadata: the simulator-assigned pedigree identifier and
/// the age the individual had reached when this record was written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndividualMetadata {
    pub pedigree_id: i64,
    pub age: i64,
}

/// Per-population metadata. Populations without metadata are placeholders.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationMetadata {
    pub slim_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Per-mutation metadata: the simulation-level mutation type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationMetadata {
    pub mutation_type: i64,
}

/// Log of stable-id relabellings: old id, then population, then the id the
/// occurrence in that population was moved to. Nested ordered maps keep the
/// log deterministic to merge and to serialize.
pub type RemapLog = BTreeMap<i64, BTreeMap<i32, i64>>;

/// The user-extensible section of the top-level metadata document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMetadata {
    /// Identifier of the group (host) this record was simulated for.
    #[serde(default)]
    pub host_id: Option<String>,
    /// Groups this record seeds downstream.
    #[serde(default)]
    pub output_host_ids: Vec<String>,
    /// Group key to the pedigree ids of the individuals founding that group.
    #[serde(default)]
    pub founders: BTreeMap<String, Vec<i64>>,
    /// Group key to the tick at which that group was founded.
    #[serde(default)]
    pub founding_time: BTreeMap<String, i64>,
    /// Stable-id relabellings applied to this record so far.
    #[serde(default)]
    pub id_remaps: RemapLog,
}

/// Top-level metadata of a table collection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TopLevelMetadata {
    /// The simulation clock at which this record was written.
    pub tick: i64,
    pub cycle: i64,
    #[serde(default)]
    pub user: UserMetadata,
}

impl TopLevelMetadata {
    #[must_use]
    pub fn at_tick(tick: i64) -> Self {
        Self {
            tick,
            cycle: tick,
            user: UserMetadata::default(),
        }
    }
}
