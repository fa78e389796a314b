//! Clap argument types. Dispatch lives in `main.rs`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(
    name = "rustunion",
    version,
    about = "Combine, realign and reconcile ancestry records produced by \
             forward-in-time simulations"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Union two records of the same process (e.g. a run and its restart)
    Union(UnionArgs),
    /// Merge related records through their shared founder registries
    Merge(MergeArgs),
    /// Merge sampled records along a declared transmission sequence
    PhyloMerge(PhyloMergeArgs),
    /// Rewind a record to the founding tick of one of its output groups
    Reset(ResetArgs),
    /// Summarize a record's tables and metadata as JSON
    Info(InfoArgs),
}

#[derive(clap::Args, Debug)]
pub struct UnionArgs {
    /// The two records to union: the base, then the donor
    #[clap(long, short = 'i', num_args = 2, required = true)]
    pub input: Vec<PathBuf>,
    /// Path for the merged record
    #[clap(long, short = 'o')]
    pub output: PathBuf,
    /// Only nodes at or above this time may be identified across records
    #[clap(long)]
    pub split_time: Option<f64>,
    /// Fail instead of merging when the shared histories differ
    #[clap(long)]
    pub check_shared_equality: bool,
}

#[derive(clap::Args, Debug)]
pub struct MergeArgs {
    /// All records to merge
    #[clap(long, short = 'i', num_args = 1.., required = true)]
    pub input: Vec<PathBuf>,
    /// Path for the merged record
    #[clap(long, short = 'o')]
    pub output: PathBuf,
    /// Offset used when replaying identifier remap logs; inferred from the
    /// logs when not given
    #[clap(long)]
    pub offset: Option<i64>,
}

#[derive(clap::Args, Debug)]
pub struct PhyloMergeArgs {
    /// Directory holding the sampled records
    #[clap(long, short = 'i')]
    pub input_dir: PathBuf,
    /// Transmission sequence CSV declaring who infected whom and when
    #[clap(long, short = 'I')]
    pub inf_sequence: PathBuf,
    /// Path for the merged record (a .tsz suffix compresses the output)
    #[clap(long, short = 'o')]
    pub output: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct ResetArgs {
    /// Record to rewind
    #[clap(long, short = 'i')]
    pub input: PathBuf,
    /// Group key whose founding tick becomes the new clock
    #[clap(long)]
    pub host_id: String,
    /// Path for the rewound record
    #[clap(long, short = 'o')]
    pub output: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct InfoArgs {
    /// Record to summarize
    #[clap(long, short = 'i')]
    pub input: PathBuf,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn union_takes_exactly_two_inputs() {
        let cli = Cli::try_parse_from([
            "rustunion",
            "union",
            "-i",
            "a.trees",
            "b.trees",
            "-o",
            "out.trees",
            "--split-time",
            "50",
        ])
        .unwrap();
        match cli.command {
            Command::Union(args) => {
                assert_eq!(args.input.len(), 2);
                assert_eq!(args.split_time, Some(50.0));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(Cli::try_parse_from([
            "rustunion", "union", "-i", "a.trees", "-o", "out.trees"
        ])
        .is_err());
    }

    #[test]
    fn merge_accepts_many_inputs() {
        let cli = Cli::try_parse_from([
            "rustunion",
            "merge",
            "-i",
            "a.trees",
            "b.trees",
            "c.tsz",
            "-o",
            "all.trees",
        ])
        .unwrap();
        match cli.command {
            Command::Merge(args) => {
                assert_eq!(args.input.len(), 3);
                assert_eq!(args.offset, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
