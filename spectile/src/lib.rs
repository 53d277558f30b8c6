//! Spectile - resumable, sectioned feature extraction for large rasters
//!
//! The library splits an input raster into a grid of sections, computes
//! multi-scale features for every section on a bounded worker pool, and
//! appends the results band-by-band into per-section tile files. A YAML
//! status ledger records per-(tile, trigger) progress so an interrupted run
//! can be repeated with identical parameters and only redo unfinished work.
//! Once every cell is complete the tiles are merged into a VRT mosaic.
//!
//! # Architecture
//!
//! ```text
//! RunCoordinator ──► (trigger × band) ──► ParallelScheduler ──► SectionWorker
//!       │                                                        │  │  │
//!       │                                          RasterStore ◄─┘  │  └─► SharedLedger
//!       │                                                FeatureComputer
//!       └──► sweep SharedLedger ──► MosaicBuilder
//! ```
//!
//! # Example
//!
//! ```ignore
//! use spectile::config::{RunConfig, Trigger};
//! use spectile::coordinator::RunCoordinator;
//!
//! let config = RunConfig::new("scene.stl", "out")
//!     .with_triggers(vec![Trigger::Mean, Trigger::Ndvi])
//!     .with_section_size(4000);
//!
//! let summary = RunCoordinator::with_defaults(config).run()?;
//! println!("{} unfinished cells", summary.unfinished);
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod features;
pub mod grid;
pub mod ledger;
pub mod logging;
pub mod mosaic;
pub mod params;
pub mod raster;
pub mod scheduler;
pub mod worker;

pub use error::{RunError, RunResult};

/// Library version, recorded in the parameter log.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
