use crate::engine::ScanSummary;
use std::path::Path;

/// Trait for reporting scan progress.
///
/// The CLI implements it with indicatif spinners. All methods default to no-ops.
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self, _root: &str) {}
    fn on_file(&self, _files_seen: u64, _path: &Path) {}
    fn on_sweep_start(&self, _unseen: u64) {}
    fn on_scan_complete(&self, _summary: &ScanSummary) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
