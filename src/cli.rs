use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tracks file changes in directory trees via a per-tree manifest
#[derive(Parser, Debug)]
#[command(name = "partmark", version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// File or directory name to skip, in addition to the built-in list
    /// (repeatable)
    #[arg(long, value_name = "NAME", global = true)]
    pub ignore: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Hash a partition and record the changes in its manifest
    Hash {
        /// Partition directory
        #[arg(value_name = "DIR")]
        partition_dir: PathBuf,
    },

    /// Re-hash partitions and report every divergence from their manifests
    Check {
        /// Partition directories
        #[arg(value_name = "DIR", required = true)]
        partition_dirs: Vec<PathBuf>,

        /// Number of partitions checked in parallel (defaults to the number
        /// of CPUs)
        #[arg(short, long, value_name = "N")]
        jobs: Option<usize>,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
