//! MediaQuiz CLI - operator tool for the quiz image collections.

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use colored::Colorize;

mod commands;
mod exit_codes;
mod utils;

use exit_codes::ExitCode;

const EXIT_CODES_HELP: &str = "\
Exit codes:
  0   Success
  1   General error
  64  Usage error
  65  Malformed manifest data
  66  Input file or directory not found
  69  Remote repository or manifest unavailable
  74  I/O error writing output
  75  Working copy locked by another process
  78  Missing or invalid configuration";

#[derive(Parser)]
#[command(name = "mediaquiz")]
#[command(author, version, about = "Maintain MediaQuiz image collections", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Which local working copy to operate on
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RepoKind {
    /// Shallow canonical clone serving quiz images
    Cache,
    /// Full canonical clone used for promotion
    Canonical,
    /// Staging collection holding unverified uploads
    Staging,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone or fast-forward a local working copy to its remote
    Sync {
        #[arg(short, long, value_enum, default_value = "cache")]
        repo: RepoKind,
    },

    /// Write ids.csv and hashes.csv for a collection directory
    Manifest {
        /// Collection root (category/item/image layout)
        #[arg(value_name = "ROOT")]
        root: PathBuf,

        /// Output directory (defaults to ROOT)
        #[arg(short, long, value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// Report groups of near-identical images in a hash manifest
    Duplicates {
        /// Path to a hashes.csv manifest
        #[arg(value_name = "HASHES")]
        hashes: PathBuf,

        /// Maximum Hamming distance counted as a duplicate
        #[arg(short, long)]
        distance: Option<u32>,

        /// Print groups as JSON
        #[arg(long)]
        json: bool,
    },

    /// Promote or drop staged images by operator decision
    #[command(group(
        ArgGroup::new("decisions")
            .required(true)
            .multiple(true)
            .args(["accept", "reject"])
    ))]
    Promote {
        /// Image id to move into the canonical collection
        #[arg(long, value_name = "ID")]
        accept: Vec<String>,

        /// Image id to remove from staging
        #[arg(long, value_name = "ID")]
        reject: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                exit_codes::USAGE_ERROR
            } else {
                exit_codes::SUCCESS
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    utils::init_tracing(cli.verbose);

    let exit = match run(cli.command).await {
        Ok(()) => ExitCode::success(),
        Err(err) => ExitCode::from_anyhow(&err),
    };

    if let Some(message) = &exit.message {
        eprintln!("{} {}", "error:".red().bold(), message);
    }
    std::process::exit(exit.code);
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Sync { repo } => commands::sync::execute(repo).await,
        Commands::Manifest { root, out } => commands::manifest::execute(root, out).await,
        Commands::Duplicates {
            hashes,
            distance,
            json,
        } => commands::duplicates::execute(hashes, distance, json).await,
        Commands::Promote { accept, reject } => commands::promote::execute(accept, reject).await,
    }
}
