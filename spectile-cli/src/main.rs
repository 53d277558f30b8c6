//! Spectile CLI - sectioned, resumable feature extraction
//!
//! ```text
//! spectile run scene.stl out --triggers mean,ndvi --scales 8,16 -j 4
//! spectile status scene.stl out
//! ```

mod commands;
mod error;
mod progress;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use spectile::logging::{init_logging, LogConfig};

use crate::commands::{run, status};
use crate::error::CliError;

#[derive(Debug, Parser)]
#[command(name = "spectile", version, about = "Sectioned, resumable feature extraction for large rasters")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Also write daily-rolling log files to this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Extract features, resuming any unfinished previous run
    Run(run::RunArgs),
    /// Show per-trigger progress recorded in the status file
    Status(status::StatusArgs),
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let mut log_config = LogConfig::default().with_level(level);
    if let Some(dir) = &cli.log_dir {
        log_config = log_config.with_log_dir(dir);
    }

    let guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => exit(CliError::from(e)),
    };
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "spectile starting");

    let result = match cli.command {
        Commands::Run(args) => run::run(args),
        Commands::Status(args) => status::run(args),
    };

    // process::exit skips destructors; flush file logs first
    drop(guard);
    if let Err(e) = result {
        exit(e);
    }
}

fn exit(e: CliError) -> ! {
    eprintln!("Error: {}", e);
    std::process::exit(e.exit_code());
}
