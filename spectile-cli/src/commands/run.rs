//! `spectile run`: extract features for one image.

use std::path::PathBuf;

use clap::Args;
use spectile::config::{
    FailurePolicy, RunConfig, Trigger, WorkerCount, DEFAULT_BAND_NIR, DEFAULT_BAND_RED,
    DEFAULT_BLOCK, DEFAULT_SECTION_SIZE,
};
use spectile::coordinator::RunCoordinator;
use spectile::scheduler::CancelFlag;

use crate::error::CliError;
use crate::progress::BatchProgress;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Input image
    pub input: PathBuf,

    /// Directory for the status file, tiles and mosaic
    pub output_dir: PathBuf,

    /// Comma-separated triggers, processed in order (mean, ndvi, evi2, grad, saliency, dmp)
    #[arg(short, long, value_delimiter = ',', default_value = "mean")]
    pub triggers: Vec<Trigger>,

    /// Comma-separated 1-based band positions
    #[arg(short, long, value_delimiter = ',', default_value = "1")]
    pub bands: Vec<usize>,

    /// Comma-separated statistics window sizes
    #[arg(short, long, value_delimiter = ',', default_value = "8")]
    pub scales: Vec<usize>,

    /// Output pixel size in input pixels
    #[arg(long, default_value_t = DEFAULT_BLOCK)]
    pub block: usize,

    /// Section size in input pixels
    #[arg(long, default_value_t = DEFAULT_SECTION_SIZE)]
    pub section_size: usize,

    /// Parallel workers, -1 for one per CPU
    #[arg(short = 'j', long, default_value_t = -1, allow_negative_numbers = true)]
    pub jobs: i64,

    /// Recompute tiles that are already complete
    #[arg(long)]
    pub overwrite: bool,

    /// Convert bands 1-3 to grayscale first
    #[arg(long)]
    pub use_rgb: bool,

    /// Only build the mosaic from finished tiles
    #[arg(long)]
    pub stack_only: bool,

    /// Red band for vegetation indices
    #[arg(long, default_value_t = DEFAULT_BAND_RED)]
    pub band_red: usize,

    /// Near-infrared band for vegetation indices
    #[arg(long, default_value_t = DEFAULT_BAND_NIR)]
    pub band_nir: usize,

    /// Record mosaic overviews
    #[arg(long)]
    pub overviews: bool,

    /// Stop at the first batch with failed sections
    #[arg(long)]
    pub abort_on_error: bool,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl RunArgs {
    pub fn to_config(&self) -> RunConfig {
        let policy = if self.abort_on_error {
            FailurePolicy::Abort
        } else {
            FailurePolicy::Continue
        };

        RunConfig::new(&self.input, &self.output_dir)
            .with_triggers(self.triggers.clone())
            .with_band_positions(self.bands.clone())
            .with_scales(self.scales.clone())
            .with_block(self.block)
            .with_section_size(self.section_size)
            .with_workers(WorkerCount::from_jobs(self.jobs))
            .with_overwrite(self.overwrite)
            .with_use_rgb(self.use_rgb)
            .with_stack_only(self.stack_only)
            .with_vegetation_bands(self.band_red, self.band_nir)
            .with_overviews(self.overviews)
            .with_failure_policy(policy)
    }
}

/// Run the `run` command.
pub fn run(args: RunArgs) -> Result<(), CliError> {
    let config = args.to_config();

    // Ctrl+C lets running sections finish; the rest stay unfinished
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Interrupted, finishing sections in progress...");
        flag.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let progress = (!args.no_progress).then(BatchProgress::new);

    let mut coordinator = RunCoordinator::with_defaults(config).with_cancel_flag(cancel);
    if let Some(progress) = &progress {
        coordinator = coordinator.with_progress(progress.callback());
    }

    let result = coordinator.run();
    if let Some(progress) = &progress {
        progress.finish();
    }
    let summary = result?;

    if summary.already_finished {
        println!("Already finished: {}", args.input.display());
    } else {
        println!(
            "Sections: {} complete, {} skipped, {} corrupt, {} failed",
            summary.complete, summary.skipped, summary.corrupt, summary.failed
        );
    }

    if let Some(mosaic) = &summary.mosaic {
        println!("Mosaic: {}", mosaic.display());
    }

    if summary.unfinished > 0 {
        return Err(CliError::Unfinished(summary.unfinished));
    }
    Ok(())
}
