//! `spectile status`: summarize the status file of an image.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Args;
use console::style;
use spectile::config::{RunConfig, Trigger};
use spectile::ledger::{StatusLedger, TileStatus};

use crate::error::CliError;

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Input image the run was started with
    pub input: PathBuf,

    /// Output directory of the run
    pub output_dir: PathBuf,
}

/// Cell counts for one trigger.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub complete: usize,
    pub incomplete: usize,
    pub corrupt: usize,
}

/// Counts recorded cells per trigger.
pub fn tally(ledger: &StatusLedger) -> BTreeMap<Trigger, Counts> {
    let mut counts: BTreeMap<Trigger, Counts> = BTreeMap::new();
    for tile in ledger.tile_names() {
        for trigger in Trigger::ALL {
            let Some(status) = ledger.status(tile, trigger) else {
                continue;
            };
            let entry = counts.entry(trigger).or_default();
            match status {
                TileStatus::Complete => entry.complete += 1,
                TileStatus::Incomplete => entry.incomplete += 1,
                TileStatus::Corrupt => entry.corrupt += 1,
            }
        }
    }
    counts
}

/// Run the `status` command.
pub fn run(args: StatusArgs) -> Result<(), CliError> {
    let config = RunConfig::new(&args.input, &args.output_dir);
    let path = config.status_file();

    let ledger = StatusLedger::load(&path)
        .map_err(|e| CliError::Status(e.to_string()))?
        .ok_or_else(|| CliError::Status(format!("no status file at {}", path.display())))?;

    println!("Status file:  {}", path.display());
    println!("Section size: {}", ledger.section_size());
    let finished = if ledger.all_finished() {
        style("yes").green()
    } else {
        style("no").yellow()
    };
    println!("Finished:     {}", finished);
    println!();

    for (trigger, counts) in tally(&ledger) {
        let bands = ledger
            .band_order()
            .get(trigger.name())
            .map(String::as_str)
            .unwrap_or("?");
        let corrupt = if counts.corrupt > 0 {
            style(counts.corrupt.to_string()).red()
        } else {
            style(counts.corrupt.to_string())
        };
        println!(
            "  {:<6} bands {:<7} {} complete, {} incomplete, {} corrupt",
            trigger.name(),
            bands,
            counts.complete,
            counts.incomplete,
            corrupt
        );
    }

    let mosaic = config.mosaic_path();
    if mosaic.is_file() {
        println!();
        println!("Mosaic: {}", mosaic.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_counts_per_trigger() {
        let mut ledger = StatusLedger::new(100);
        ledger.set_status("a", Trigger::Mean, TileStatus::Complete);
        ledger.set_status("a", Trigger::Ndvi, TileStatus::Corrupt);
        ledger.set_status("b", Trigger::Mean, TileStatus::Incomplete);
        ledger.set_status("b", Trigger::Ndvi, TileStatus::Complete);

        let counts = tally(&ledger);
        assert_eq!(
            counts[&Trigger::Mean],
            Counts {
                complete: 1,
                incomplete: 1,
                corrupt: 0
            }
        );
        assert_eq!(counts[&Trigger::Ndvi].corrupt, 1);
        assert!(!counts.contains_key(&Trigger::Grad));
    }

    #[test]
    fn test_missing_status_file() {
        let dir = tempfile::tempdir().unwrap();
        let args = StatusArgs {
            input: dir.path().join("scene.stl"),
            output_dir: dir.path().to_path_buf(),
        };
        assert!(matches!(run(args), Err(CliError::Status(_))));
    }
}
