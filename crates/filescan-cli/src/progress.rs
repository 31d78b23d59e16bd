use filescan_core::{ProgressReporter, ScanSummary};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Spinner showing how far the walk and the sweep have got.
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn spinner(message: String) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            pb.set_style(style.tick_chars(TICKS));
        }
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_scan_start(&self, root: &str) {
        self.set_bar(Self::spinner(format!("Scanning {}", root)));
    }

    fn on_file(&self, files_seen: u64, _path: &Path) {
        if files_seen % 64 != 0 {
            return;
        }
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.set_message(format!("Scanning... {} files seen", files_seen));
            }
        }
    }

    fn on_sweep_start(&self, unseen: u64) {
        if unseen > 0 {
            self.set_bar(Self::spinner(format!("Sweeping {} deleted files...", unseen)));
        }
    }

    fn on_scan_complete(&self, summary: &ScanSummary) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Run {} complete: {} files in {:.2}s",
            summary.run_id,
            summary.counters.files,
            summary.duration.as_secs_f64()
        );
    }
}

impl Drop for CliReporter {
    fn drop(&mut self) {
        self.finish_bar();
    }
}
