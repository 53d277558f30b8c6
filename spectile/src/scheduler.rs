//! Bounded parallel fan-out over sections.
//!
//! [`ParallelScheduler::run`] calls a section function once for every index in
//! `1..=n_sects` on a fixed-size rayon pool and blocks until all of them have
//! returned. Every result is accounted for in the [`ScheduleReport`]; failures
//! are collected, never dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use tracing::{debug, warn};

use crate::config::WorkerCount;
use crate::worker::{SectionError, SectionOutcome};

/// Shared cancellation signal.
///
/// Once set, sections that have not started yet return without doing work.
/// Sections already running finish normally.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Called with the section index each time a section returns.
pub type SectionCallback<'a> = &'a (dyn Fn(usize) + Sync);

/// Aggregated results of one batch.
#[derive(Debug, Default)]
pub struct ScheduleReport {
    pub total: usize,
    pub skipped: usize,
    pub complete: usize,
    pub corrupt: usize,
    pub cancelled: usize,
    /// Failed sections with their errors, in index order.
    pub failures: Vec<(usize, SectionError)>,
}

impl ScheduleReport {
    fn record(&mut self, index: usize, result: SectionRun) {
        self.total += 1;
        match result {
            SectionRun::Finished(Ok(SectionOutcome::Skipped)) => self.skipped += 1,
            SectionRun::Finished(Ok(SectionOutcome::Complete)) => self.complete += 1,
            SectionRun::Finished(Ok(SectionOutcome::Corrupt)) => self.corrupt += 1,
            SectionRun::Finished(Err(e)) => self.failures.push((index, e)),
            SectionRun::Cancelled => self.cancelled += 1,
        }
    }

    /// Number of failed sections.
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// True when no section failed or was cancelled.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.cancelled == 0
    }
}

enum SectionRun {
    Finished(Result<SectionOutcome, SectionError>),
    Cancelled,
}

/// Runs section batches on a bounded worker pool.
pub struct ParallelScheduler {
    workers: usize,
    /// `None` runs sections sequentially on the calling thread.
    pool: Option<ThreadPool>,
    cancel: CancelFlag,
}

impl ParallelScheduler {
    /// Creates a scheduler with the given pool size.
    pub fn new(workers: WorkerCount) -> Result<Self, ThreadPoolBuildError> {
        let workers = workers.resolve();
        let pool = if workers > 1 {
            Some(
                ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("spectile-worker-{}", i))
                    .build()?,
            )
        } else {
            None
        };

        Ok(Self {
            workers,
            pool,
            cancel: CancelFlag::new(),
        })
    }

    /// Uses `cancel` as the cancellation signal.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Runs `section` for every index in `1..=n_sects` and waits for all of
    /// them. `on_done` is invoked from the worker thread after each section.
    pub fn run<F>(&self, n_sects: usize, section: F, on_done: SectionCallback<'_>) -> ScheduleReport
    where
        F: Fn(usize) -> Result<SectionOutcome, SectionError> + Sync,
    {
        let run_one = |index: usize| {
            let result = if self.cancel.is_cancelled() {
                SectionRun::Cancelled
            } else {
                SectionRun::Finished(section(index))
            };
            on_done(index);
            (index, result)
        };

        let results: Vec<(usize, SectionRun)> = match &self.pool {
            Some(pool) => pool.install(|| (1..=n_sects).into_par_iter().map(run_one).collect()),
            None => (1..=n_sects).map(run_one).collect(),
        };

        let mut report = ScheduleReport::default();
        for (index, result) in results {
            report.record(index, result);
        }

        if report.cancelled > 0 {
            warn!(
                cancelled = report.cancelled,
                total = report.total,
                "Batch cancelled before all sections started"
            );
        }
        debug!(
            total = report.total,
            complete = report.complete,
            skipped = report.skipped,
            corrupt = report.corrupt,
            failed = report.failed(),
            workers = self.workers,
            "Batch finished"
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::RasterError;
    use std::sync::atomic::AtomicUsize;

    fn noop(_: usize) {}

    #[test]
    fn test_every_index_runs_once() {
        let scheduler = ParallelScheduler::new(WorkerCount::Fixed(4)).unwrap();
        let calls = AtomicUsize::new(0);
        let sum = AtomicUsize::new(0);

        let report = scheduler.run(
            50,
            |i| {
                calls.fetch_add(1, Ordering::SeqCst);
                sum.fetch_add(i, Ordering::SeqCst);
                Ok(SectionOutcome::Complete)
            },
            &noop,
        );

        assert_eq!(calls.load(Ordering::SeqCst), 50);
        assert_eq!(sum.load(Ordering::SeqCst), (1..=50).sum::<usize>());
        assert_eq!(report.total, 50);
        assert_eq!(report.complete, 50);
        assert!(report.is_clean());
    }

    #[test]
    fn test_failures_are_collected() {
        let scheduler = ParallelScheduler::new(WorkerCount::Fixed(3)).unwrap();
        let report = scheduler.run(
            10,
            |i| match i % 3 {
                0 => Err(SectionError::Raster(RasterError::BandOutOfRange {
                    band: i,
                    bands: 1,
                })),
                1 => Ok(SectionOutcome::Skipped),
                _ => Ok(SectionOutcome::Corrupt),
            },
            &noop,
        );

        assert_eq!(report.failed(), 3);
        assert_eq!(report.skipped, 4);
        assert_eq!(report.corrupt, 3);
        let failed: Vec<usize> = report.failures.iter().map(|(i, _)| *i).collect();
        assert_eq!(failed, vec![3, 6, 9]);
    }

    #[test]
    fn test_single_worker_runs_in_order() {
        let scheduler = ParallelScheduler::new(WorkerCount::Fixed(1)).unwrap();
        assert_eq!(scheduler.workers(), 1);

        let order = parking_lot::Mutex::new(Vec::new());
        scheduler.run(
            5,
            |i| {
                order.lock().push(i);
                Ok(SectionOutcome::Complete)
            },
            &noop,
        );
        assert_eq!(*order.lock(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_cancelled_sections_do_no_work() {
        let cancel = CancelFlag::new();
        let scheduler = ParallelScheduler::new(WorkerCount::Fixed(1))
            .unwrap()
            .with_cancel_flag(cancel.clone());

        let report = scheduler.run(
            6,
            |i| {
                if i == 2 {
                    cancel.cancel();
                }
                Ok(SectionOutcome::Complete)
            },
            &noop,
        );

        assert_eq!(report.complete, 2);
        assert_eq!(report.cancelled, 4);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_callback_sees_every_section() {
        let scheduler = ParallelScheduler::new(WorkerCount::Fixed(2)).unwrap();
        let done = AtomicUsize::new(0);
        let on_done = |_: usize| {
            done.fetch_add(1, Ordering::SeqCst);
        };
        scheduler.run(7, |_| Ok(SectionOutcome::Skipped), &on_done);
        assert_eq!(done.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_empty_batch() {
        let scheduler = ParallelScheduler::new(WorkerCount::Fixed(2)).unwrap();
        let report = scheduler.run(0, |_| Ok(SectionOutcome::Complete), &noop);
        assert_eq!(report.total, 0);
        assert!(report.is_clean());
    }
}
