//! Terminal progress bars for uploads, drawn with `indicatif`.

use std::sync::Arc;

use coursecast_core::contract::{ProgressObserver, UploadProgress};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

const UPLOAD_TEMPLATE: &str =
    "[{elapsed_precise}] {prefix:.bold}▕{bar:30.blue}▏{bytes}/{total_bytes} {bytes_per_sec} {msg}";
const FINISH_TEMPLATE: &str = "[{elapsed_precise}] {prefix:.bold} {msg}";

#[derive(Default)]
pub struct BarObserver {
    multi: MultiProgress,
}

impl BarObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn upload_style() -> ProgressStyle {
        ProgressStyle::with_template(UPLOAD_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░  ")
    }

    fn finish_style() -> ProgressStyle {
        ProgressStyle::with_template(FINISH_TEMPLATE).unwrap_or_else(|_| ProgressStyle::default_bar())
    }
}

impl ProgressObserver for BarObserver {
    fn unit_started(&self, label: &str, total_bytes: u64) -> Arc<dyn UploadProgress> {
        let bar = self.multi.add(ProgressBar::new(total_bytes));
        bar.set_style(Self::upload_style());
        bar.set_prefix(label.to_string());
        Arc::new(UnitBar(bar))
    }
}

struct UnitBar(ProgressBar);

impl UploadProgress for UnitBar {
    fn advance(&self, bytes: u64) {
        self.0.inc(bytes);
    }

    fn finish(&self) {
        self.0.set_style(BarObserver::finish_style());
        self.0.finish_with_message("sent");
    }

    fn abandon(&self, reason: &str) {
        self.0.set_style(BarObserver::finish_style());
        self.0.abandon_with_message(format!("failed: {reason}"));
    }
}
