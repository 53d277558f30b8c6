//! Terminal progress bar fed by run progress events.

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use spectile::coordinator::{ProgressCallback, ProgressEvent};

const TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}";

/// One bar, reset for every (trigger, band) batch.
pub struct BatchProgress {
    bar: ProgressBar,
}

impl BatchProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        Self { bar }
    }

    /// Callback to hand to the coordinator.
    pub fn callback(&self) -> ProgressCallback {
        let bar = self.bar.clone();
        Arc::new(move |event| match event {
            ProgressEvent::BatchStarted {
                trigger,
                band,
                sections,
            } => {
                bar.reset();
                bar.set_length(sections as u64);
                bar.set_message(format!("{} (band {})", trigger, band));
            }
            ProgressEvent::SectionDone { .. } => bar.inc(1),
            ProgressEvent::BatchFinished { .. } => {}
        })
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
