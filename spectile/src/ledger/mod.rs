//! Persistent status ledger.
//!
//! The ledger is the single source of truth for which (tile, trigger) cells
//! are finished. It survives process restarts, which is what makes a repeated
//! run with identical parameters resume instead of starting over.
//!
//! - [`StatusLedger`]: the in-memory document with `load`/`dump`
//! - [`SharedLedger`]: serialized, reload-before-write access for workers
//!
//! # Cell Transitions
//!
//! ```text
//!            ┌──────────────► complete ──┐ overwrite
//! (absent) ─► incomplete                 ├──────────► incomplete
//!            └──────────────► corrupt ───┘ any trigger corrupt
//! ```

mod document;
mod error;
mod shared;

pub use document::{StatusLedger, SweepReport, TileStatus};
pub use error::{LedgerError, LedgerResult};
pub use shared::SharedLedger;
