//! Fleetsync Agent - command line entry point
//!
//! Every subcommand prints one JSON document on stdout and logs on stderr.

use anyhow::Result;
use clap::{Parser, Subcommand};
use fleetsync_agent::fs::ops::{copy_file, move_file};
use fleetsync_agent::manifest::build_report;
use fleetsync_agent::{utils, ExcludeSet};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the manifest of a directory tree
    Manifest {
        /// Root directory to snapshot
        #[arg(long)]
        root: PathBuf,

        /// Glob of root-relative paths to leave out (repeatable)
        #[arg(long = "exclude", value_name = "GLOB")]
        excludes: Vec<String>,
    },

    /// Preserve a file before it gets overwritten
    Fs {
        #[command(subcommand)]
        op: FsOp,
    },
}

#[derive(Subcommand, Debug)]
enum FsOp {
    /// Copy a file, creating parent directories
    Copy { from: PathBuf, to: PathBuf },
    /// Move a file, creating parent directories
    Move { from: PathBuf, to: PathBuf },
}

fn main() -> Result<()> {
    let args = Args::parse();
    utils::logger::init(&args.log_level)?;

    match args.command {
        Command::Manifest { root, excludes } => {
            let excludes = ExcludeSet::new(excludes.as_slice())?;
            let report = build_report(&root, &excludes)?;
            tracing::info!(root = %root.display(), files = report.files.len(), "manifest complete");
            println!("{}", serde_json::to_string(&report)?);
        }
        Command::Fs { op } => {
            let (from, to, preserved) = match op {
                FsOp::Copy { from, to } => {
                    let preserved = copy_file(&from, &to)?;
                    (from, to, preserved)
                }
                FsOp::Move { from, to } => {
                    let preserved = move_file(&from, &to)?;
                    (from, to, preserved)
                }
            };
            tracing::info!(from = %from.display(), to = %to.display(), ?preserved, "preserved file");
            println!("{}", serde_json::json!({ "result": preserved }));
        }
    }

    Ok(())
}
