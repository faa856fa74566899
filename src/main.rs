mod checksum;
mod cli;
mod diff;
mod manifest;
mod manifest_file;
mod partition;
mod pool;
mod verify;
mod walk;

use anyhow::Context;
use cli::{Cli, Command};
use manifest::{ManifestChange, ManifestMismatch};
use partition::Partition;
use pool::CancelToken;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt as tracing_fmt;
use tracing_subscriber::prelude::*;
use walk::IgnoreList;

struct MarkExitCode;

impl MarkExitCode {
    /// Exit code used when `check` finds mismatches or fails on a partition.
    fn check_failed() -> ExitCode {
        ExitCode::from(1)
    }

    /// Exit code used for other errors (I/O errors, invalid arguments, etc.).
    fn any_error() -> ExitCode {
        ExitCode::from(255)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let mut ignore = IgnoreList::default();
    for name in cli.ignore {
        ignore.insert(name);
    }

    let result: anyhow::Result<ExitCode> = match cli.command {
        Command::Hash { partition_dir } => handle_hash(&partition_dir, &ignore),
        Command::Check {
            partition_dirs,
            jobs,
        } => Ok(handle_check(partition_dirs, ignore, jobs)),
    };

    match result {
        Ok(exit_code) => exit_code,
        Err(err) => {
            error!("{err:#}");
            MarkExitCode::any_error()
        }
    }
}

fn handle_hash(dir: &Path, ignore: &IgnoreList) -> anyhow::Result<ExitCode> {
    let mut partition = Partition::load(dir)
        .with_context(|| format!("Failed to load partition {}", dir.display()))?;

    let changes = partition
        .hash(ignore, &CancelToken::new())
        .with_context(|| format!("Failed to hash partition {}", dir.display()))?;

    for change in &changes {
        if let Some(line) = format_change_line(change) {
            println!("{line}");
        }
    }

    partition.apply_changes(&changes);
    partition
        .save()
        .with_context(|| format!("Failed to save manifest for {}", dir.display()))?;

    info!("Recorded {} change(s) in {}", changes.len(), dir.display());

    Ok(ExitCode::SUCCESS)
}

fn handle_check(dirs: Vec<PathBuf>, ignore: IgnoreList, jobs: Option<usize>) -> ExitCode {
    let concurrency = jobs.unwrap_or_else(pool::default_concurrency);

    let output = pool::map_concurrently(
        dirs,
        concurrency,
        move |dir: PathBuf, cancel: &CancelToken| check_partition(&dir, &ignore, cancel),
    );

    let mut clean = true;

    for line in output.iter() {
        clean = false;
        println!("{line}");
    }

    if let Err(err) = output.finish() {
        error!("{err:#}");
        return MarkExitCode::check_failed();
    }

    if clean {
        info!("All partitions match their manifests");
        ExitCode::SUCCESS
    } else {
        MarkExitCode::check_failed()
    }
}

fn check_partition(
    dir: &Path,
    ignore: &IgnoreList,
    cancel: &CancelToken,
) -> anyhow::Result<Vec<String>> {
    let partition = Partition::load(dir)
        .with_context(|| format!("Failed to load partition {}", dir.display()))?;

    let mismatches = partition
        .check(ignore, cancel)
        .with_context(|| format!("Failed to check partition {}", dir.display()))?;

    Ok(mismatches
        .iter()
        .map(|mismatch| format_mismatch_line(dir, mismatch))
        .collect())
}

/// One output line per reportable change. Spurious mtime changes are
/// recorded in the manifest but not reported.
fn format_change_line(change: &ManifestChange) -> Option<String> {
    match change {
        ManifestChange::FileAdded { path, .. } => Some(format!("+ {path}")),
        ManifestChange::FileModified { path, .. } => Some(format!("* {path}")),
        ManifestChange::FileRemoved { path } => Some(format!("- {path}")),
        ManifestChange::SpuriousMtimeChange { .. } => None,
    }
}

fn format_mismatch_line(dir: &Path, mismatch: &ManifestMismatch) -> String {
    match mismatch {
        ManifestMismatch::FileNotHashed { path } => {
            format!("?+ {} {path}", dir.display())
        }
        ManifestMismatch::FileMissing { path } => {
            format!("?- {} {path}", dir.display())
        }
        ManifestMismatch::HashDoesNotMatch {
            path,
            actual_hash,
            expected_hash,
        } => {
            format!(
                "?* {} {path} actual={actual_hash} expected={expected_hash}",
                dir.display()
            )
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = tracing_fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
