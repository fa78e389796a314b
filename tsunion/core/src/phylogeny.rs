//! Merge-order derivation for many-way merges. A transmission sequence
//! declares who infected whom and when; the records of the sampled
//! infections are then combined tips-to-root, each group of siblings
//! resolving into their most recent common ancestor at that ancestor's
//! transmission day.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use fnv::{FnvHashMap, FnvHashSet};

use tsunion_tables::TableCollection;

use crate::merge::merge_at_split;
use crate::repair::repair_false_roots;

/// One row of the transmission sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InfectionRecord {
    pub inf_id: String,
    pub source: String,
    pub host_id: String,
    pub transmission_day: i64,
    pub overall_day: i64,
    pub inf_step: i64,
}

/// Parses the transmission sequence CSV. The header must name `inf_id`,
/// `inf_source` (or `origin_id`), `host_id`, `transmission_day`,
/// `overall_day` and `inf_step`; extra columns are ignored.
///
/// # Errors
///
/// Fails on a missing column or an unparsable field, naming the line.
pub fn parse_infection_sequence(text: &str) -> anyhow::Result<Vec<InfectionRecord>> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = lines.next().context("the transmission sequence is empty")?;
    let columns: Vec<&str> = header.split(',').map(str::trim).collect();
    let find = |names: &[&str]| {
        names
            .iter()
            .find_map(|n| columns.iter().position(|c| c == n))
            .with_context(|| format!("the transmission sequence has no {} column", names[0]))
    };
    let inf_id = find(&["inf_id"])?;
    let source = find(&["inf_source", "origin_id"])?;
    let host_id = find(&["host_id"])?;
    let transmission_day = find(&["transmission_day"])?;
    let overall_day = find(&["overall_day"])?;
    let inf_step = find(&["inf_step"])?;

    let mut out = Vec::new();
    for (number, line) in lines.enumerate() {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let field = |index: usize| {
            fields
                .get(index)
                .copied()
                .with_context(|| format!("line {}: missing field {index}", number + 2))
        };
        let int = |index: usize| -> anyhow::Result<i64> {
            field(index)?
                .parse()
                .with_context(|| format!("line {}: unparsable integer", number + 2))
        };
        out.push(InfectionRecord {
            inf_id: field(inf_id)?.to_owned(),
            source: field(source)?.to_owned(),
            host_id: field(host_id)?.to_owned(),
            transmission_day: int(transmission_day)?,
            overall_day: int(overall_day)?,
            inf_step: int(inf_step)?,
        });
    }
    Ok(out)
}

/// # Errors
///
/// Fails if the file cannot be read or parsed; see
/// [`parse_infection_sequence`].
pub fn read_infection_sequence(path: &Path) -> anyhow::Result<Vec<InfectionRecord>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read the transmission sequence {}", path.display()))?;
    parse_infection_sequence(&text)
}

/// The infections of the final transmission step; these are the sampled
/// tips of the transmission tree.
#[must_use]
pub fn sampled_infections(records: &[InfectionRecord]) -> Vec<String> {
    let Some(last_step) = records.iter().map(|r| r.inf_step).max() else {
        return Vec::new();
    };
    records
        .iter()
        .filter(|r| r.inf_step == last_step)
        .map(|r| r.inf_id.clone())
        .collect()
}

/// The chain of infections above `inf`, nearest first, stopping at the
/// index case.
#[must_use]
pub fn infection_ancestors(records: &[InfectionRecord], inf: &str) -> Vec<String> {
    let sources: FnvHashMap<&str, &str> = records
        .iter()
        .map(|r| (r.inf_id.as_str(), r.source.as_str()))
        .collect();
    let mut out = Vec::new();
    let mut current = inf;
    while current != "0" {
        let Some(&source) = sources.get(current) else {
            break;
        };
        if source == "0" {
            break;
        }
        out.push(source.to_owned());
        current = source;
    }
    out
}

/// One resolution step of the tips-to-root schedule: merge the records
/// standing for `members` into the record of their most recent common
/// ancestor `mrca`, splitting at that ancestor's overall day.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeStep {
    pub mrca: String,
    pub members: Vec<String>,
    pub split_day: i64,
}

/// Derives the merge schedule from the transmission sequence: an explicit
/// post-order walk of the transmission tree, pruned to the sampled tips
/// and their ancestors. Children resolve before their parents, so the
/// schedule runs tips-to-root.
#[must_use]
pub fn merge_schedule(records: &[InfectionRecord]) -> Vec<MergeStep> {
    let samples = sampled_infections(records);
    let sample_set: FnvHashSet<&str> = samples.iter().map(String::as_str).collect();

    let mut relevant: FnvHashSet<String> = FnvHashSet::default();
    for sample in &samples {
        relevant.insert(sample.clone());
        for ancestor in infection_ancestors(records, sample) {
            relevant.insert(ancestor);
        }
    }

    let day_of: FnvHashMap<&str, i64> = records
        .iter()
        .map(|r| (r.inf_id.as_str(), r.overall_day))
        .collect();
    let mut children: FnvHashMap<&str, Vec<&str>> = FnvHashMap::default();
    let mut roots: Vec<&str> = Vec::new();
    for record in records {
        if !relevant.contains(&record.inf_id) {
            continue;
        }
        if record.source == "0" || !relevant.contains(&record.source) {
            roots.push(&record.inf_id);
        } else {
            children
                .entry(record.source.as_str())
                .or_default()
                .push(&record.inf_id);
        }
    }

    let mut steps = Vec::new();
    let mut representative: FnvHashMap<&str, &str> = FnvHashMap::default();
    for root in roots {
        // iterative post-order: (node, children expanded yet?)
        let mut stack: Vec<(&str, bool)> = vec![(root, false)];
        while let Some((node, expanded)) = stack.pop() {
            if !expanded {
                stack.push((node, true));
                for &child in children.get(node).into_iter().flatten() {
                    stack.push((child, false));
                }
                continue;
            }
            let mut members: Vec<&str> = Vec::new();
            if sample_set.contains(node) {
                members.push(node);
            }
            for &child in children.get(node).into_iter().flatten() {
                if let Some(&rep) = representative.get(child) {
                    members.push(rep);
                }
            }
            match members.len() {
                0 => {}
                // a lone subtree passes its representative upwards unmerged
                1 => {
                    representative.insert(node, members[0]);
                }
                _ => {
                    steps.push(MergeStep {
                        mrca: node.to_owned(),
                        members: members.iter().map(|&m| m.to_owned()).collect(),
                        split_day: day_of.get(node).copied().unwrap_or(0),
                    });
                    representative.insert(node, node);
                }
            }
        }
    }
    steps
}

/// Runs a schedule over the loaded sample records, threading each step's
/// result in under its resolving infection id and repairing any false
/// roots the pairwise unions expose. `max_tick` is the shared clock the
/// records were aligned to.
///
/// # Errors
///
/// Fails when a scheduled record is missing or a pairwise merge reports an
/// inconsistency.
#[allow(clippy::implicit_hasher, clippy::cast_precision_loss)]
pub fn execute_schedule(
    mut trees: FnvHashMap<String, TableCollection>,
    schedule: &[MergeStep],
    max_tick: i64,
) -> anyhow::Result<TableCollection> {
    if schedule.is_empty() {
        let mut values: Vec<_> = trees.into_iter().collect();
        match values.len() {
            1 => return Ok(values.pop().expect("nonempty").1),
            n => bail!("no merge steps were derived for {n} records"),
        }
    }

    for step in schedule {
        let split_time = (max_tick - step.split_day - 1) as f64;
        info!(
            "resolving infection {} from {:?} at split time {split_time}",
            step.mrca, step.members
        );
        let mut acc = trees
            .remove(&step.members[0])
            .with_context(|| format!("no record stands for infection {}", step.members[0]))?;
        for member in &step.members[1..] {
            let donor = trees
                .remove(member)
                .with_context(|| format!("no record stands for infection {member}"))?;
            let (mut merged, donor_map) =
                merge_at_split(&acc, &donor, Some(split_time), false)
                    .with_context(|| format!("merging {member} into {}", step.mrca))?;
            let report = repair_false_roots(&mut merged, &acc, &donor, &donor_map)
                .context("topology repair after union")?;
            if !report.unrootable.is_empty() {
                warn!(
                    "{} roots could not be reattached while resolving {}",
                    report.unrootable.len(),
                    step.mrca
                );
            }
            acc = merged;
        }
        trees.insert(step.mrca.clone(), acc);
    }

    let last = &schedule[schedule.len() - 1].mrca;
    trees
        .remove(last)
        .with_context(|| format!("the schedule did not resolve to {last}"))
}

#[cfg(test)]
mod tests {
    use super::{
        execute_schedule, infection_ancestors, merge_schedule, parse_infection_sequence,
        sampled_infections, MergeStep,
    };
    use fnv::FnvHashMap;
    use tsunion_tables::{NodeMetadata, TableCollection, NODE_IS_SAMPLE, NULL};

    const SEQUENCE: &str = "\
inf_id,inf_source,host_id,transmission_day,overall_day,inf_step,output_host_ids
1,0,h1,0,1,0,
2,1,h2,2,3,1,
3,1,h3,3,4,2,
4,2,h4,3,6,2,
5,2,h5,4,7,2,
";

    #[test]
    fn parses_the_declared_columns() {
        let records = parse_infection_sequence(SEQUENCE).unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[1].inf_id, "2");
        assert_eq!(records[1].source, "1");
        assert_eq!(records[4].overall_day, 7);
        assert_eq!(sampled_infections(&records), vec!["3", "4", "5"]);
    }

    #[test]
    fn missing_columns_are_reported() {
        assert!(parse_infection_sequence("a,b,c\n1,2,3\n").is_err());
    }

    #[test]
    fn ancestor_chains_stop_at_the_index_case() {
        let records = parse_infection_sequence(SEQUENCE).unwrap();
        assert_eq!(infection_ancestors(&records, "5"), vec!["2", "1"]);
        assert_eq!(infection_ancestors(&records, "1"), Vec::<String>::new());
    }

    #[test]
    fn schedule_resolves_tips_to_root() {
        let records = parse_infection_sequence(SEQUENCE).unwrap();
        let schedule = merge_schedule(&records);
        assert_eq!(
            schedule,
            vec![
                MergeStep {
                    mrca: "2".to_owned(),
                    members: vec!["4".to_owned(), "5".to_owned()],
                    split_day: 3,
                },
                MergeStep {
                    mrca: "1".to_owned(),
                    members: vec!["2".to_owned(), "3".to_owned()],
                    split_day: 1,
                },
            ]
        );
    }

    #[test]
    fn executing_a_schedule_folds_all_records() {
        let records = parse_infection_sequence(SEQUENCE).unwrap();
        let schedule = merge_schedule(&records);

        let mut trees: FnvHashMap<String, TableCollection> = FnvHashMap::default();
        for (i, inf) in ["3", "4", "5"].iter().enumerate() {
            let mut tables = TableCollection::new(10.0);
            tables.add_population(None);
            tables.add_node(
                NODE_IS_SAMPLE,
                0.0,
                0,
                NULL,
                Some(NodeMetadata {
                    slim_id: 1000 + i as i64,
                    is_vacant: false,
                }),
            );
            tables.metadata.tick = 10;
            tables.metadata.cycle = 10;
            trees.insert((*inf).to_owned(), tables);
        }

        let merged = execute_schedule(trees, &schedule, 10).unwrap();
        // fully disjoint records: the fold is additive
        assert_eq!(merged.num_nodes(), 3);
    }
}
