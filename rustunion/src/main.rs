#![deny(clippy::pedantic)]
#![allow(
    clippy::missing_panics_doc,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::float_cmp
)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use fnv::FnvHashMap;
use log::{info, warn};

use tsunion_core::align::{clear_alive, reset_time, shift_times, strip_vacant_samples};
use tsunion_core::merge::{merge_all_with_founders, merge_at_split, merge_remap_logs};
use tsunion_core::phylogeny::{execute_schedule, merge_schedule, read_infection_sequence};
use tsunion_core::relabel::{apply_remaps, infer_offset};
use tsunion_core::repair::repair_false_roots;
use tsunion_tables::{RemapLog, TableCollection};

mod cli;

use cli::{Cli, Command, InfoArgs, MergeArgs, PhyloMergeArgs, ResetArgs, UnionArgs};

fn main() -> Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Command::Union(args) => union(&args),
        Command::Merge(args) => merge(&args),
        Command::PhyloMerge(args) => phylo_merge(&args),
        Command::Reset(args) => reset(&args),
        Command::Info(args) => info_summary(&args),
    }
}

fn union(args: &UnionArgs) -> Result<()> {
    let base = clear_alive(&TableCollection::load_auto(&args.input[0])?);
    let donor = clear_alive(&TableCollection::load_auto(&args.input[1])?);

    let (mut merged, donor_map) = merge_at_split(
        &base,
        &donor,
        args.split_time,
        args.check_shared_equality,
    )?;
    let report = repair_false_roots(&mut merged, &base, &donor, &donor_map)?;
    if !report.unrootable.is_empty() {
        warn!(
            "{} roots could not be reattached and remain in the output",
            report.unrootable.len()
        );
    }

    merged.dump_auto(&args.output)
}

fn merge(args: &MergeArgs) -> Result<()> {
    let mut records = Vec::with_capacity(args.input.len());
    for path in &args.input {
        records.push(TableCollection::load_auto(path)?);
    }

    // place every record on the clock of the most advanced one
    let max_tick = records
        .iter()
        .map(|r| r.metadata.tick)
        .max()
        .context("no input records")?;
    let mut records: Vec<TableCollection> = records
        .iter()
        .map(|r| shift_times(r, max_tick - r.metadata.tick))
        .collect();

    // replay every relabelling any record carries onto all of them
    let mut log = RemapLog::new();
    for record in &records {
        log = merge_remap_logs(&log, &record.metadata.user.id_remaps)?;
    }
    if !log.is_empty() {
        let offset = match args.offset {
            Some(offset) => offset,
            None => infer_offset(&log)
                .context("cannot infer the remap offset; pass --offset")?,
        };
        info!("replaying {} remap entries with offset {offset}", log.len());
        records = records
            .iter()
            .map(|r| apply_remaps(r, &log, offset))
            .collect();
    }

    let mut iter = records.into_iter();
    let first = iter.next().context("no input records")?;
    let merged = merge_all_with_founders(first, iter.collect(), false)?;
    merged.dump_auto(&args.output)
}

fn sample_file(dir: &Path, stem: &str) -> Result<Option<PathBuf>> {
    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to list the input directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains(stem))
        {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

#[allow(clippy::cast_possible_truncation)]
fn phylo_merge(args: &PhyloMergeArgs) -> Result<()> {
    let records = read_infection_sequence(&args.inf_sequence)?;
    let samples = tsunion_core::phylogeny::sampled_infections(&records);

    info!("loading {} sample records", samples.len());
    let mut trees: FnvHashMap<String, TableCollection> = FnvHashMap::default();
    let mut missing = Vec::new();
    for inf in &samples {
        let row = records
            .iter()
            .find(|r| &r.inf_id == inf)
            .expect("sampled infections come from the records");
        let stem = format!(
            "inf{inf}_{}_on_inf_day_{}_on_overall_day_{}",
            row.host_id, row.transmission_day, row.overall_day
        );
        match sample_file(&args.input_dir, &stem)? {
            Some(path) => {
                let tables = TableCollection::load_auto(&path)?;
                trees.insert(inf.clone(), tables);
            }
            None => missing.push(stem),
        }
    }
    if !missing.is_empty() {
        bail!(
            "no record file matches {} - are you sure they were created?",
            missing.join(", ")
        );
    }

    let max_tick = trees
        .values()
        .map(|t| t.metadata.tick)
        .max()
        .context("no sample records were loaded")?;
    for tables in trees.values_mut() {
        let aligned = shift_times(tables, max_tick - tables.metadata.tick);
        *tables = strip_vacant_samples(&aligned);
    }

    let merged = if trees.len() == 1 {
        info!("only 1 sample record was found and processed");
        trees.into_iter().next().expect("nonempty").1
    } else {
        let schedule = merge_schedule(&records);
        info!(
            "merging {} sample records in {} steps",
            trees.len(),
            schedule.len()
        );
        execute_schedule(trees, &schedule, max_tick)?
    };

    info!("simplifying and writing out the final record");
    let sample_nodes: Vec<i32> = (0..merged.num_nodes() as i32)
        .filter(|&n| merged.nodes()[n as usize].is_sample())
        .collect();
    let (simple, _) = merged.simplify(&sample_nodes, true)?;
    simple.dump_auto(&args.output)
}

fn reset(args: &ResetArgs) -> Result<()> {
    let tables = TableCollection::load_auto(&args.input)?;
    let founding_tick = *tables
        .metadata
        .user
        .founding_time
        .get(&args.host_id)
        .with_context(|| format!("the record has no founding time for group {}", args.host_id))?;
    reset_time(&tables, founding_tick).dump_auto(&args.output)
}

fn info_summary(args: &InfoArgs) -> Result<()> {
    let tables = TableCollection::load_auto(&args.input)?;
    let summary = serde_json::json!({
        "sequence_length": tables.sequence_length(),
        "nodes": tables.num_nodes(),
        "edges": tables.num_edges(),
        "sites": tables.sites().len(),
        "mutations": tables.num_mutations(),
        "individuals": tables.individuals().len(),
        "populations": tables.populations().len(),
        "tick": tables.metadata.tick,
        "host_id": &tables.metadata.user.host_id,
        "output_host_ids": &tables.metadata.user.output_host_ids,
        "founders": &tables.metadata.user.founders,
        "founding_time": &tables.metadata.user.founding_time,
        "id_remaps": &tables.metadata.user.id_remaps,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
