use crate::config::ScanOptions;
use crate::error::{Error, Result};
use crate::hasher::{digest_file, ChecksumRegistry};
use crate::progress::ProgressReporter;
use crate::scanner::{self, DiskFile, Walker};
use crate::storage::models::*;
use crate::storage::Store;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Reconciles one directory tree at a time against the inventory held in `S`.
pub struct ScanEngine<S: Store> {
    store: S,
    registry: ChecksumRegistry,
    options: ScanOptions,
    cancel_token: Arc<AtomicBool>,
}

#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub run_id: RunId,
    /// Normalized root, trailing separator included.
    pub root: String,
    pub counters: ScanCounters,
    /// Walk entries, files and units of work that were skipped.
    pub errors: u64,
    pub duration: Duration,
}

#[derive(Default)]
struct Tally {
    counters: ScanCounters,
    errors: u64,
    /// Directories the walk could not read; nothing under them is swept.
    spared_dirs: Vec<String>,
    /// Files still on disk whose bookkeeping failed.
    spared_files: Vec<(String, String)>,
}

impl Tally {
    fn spare_path(&mut self, path: &Path) {
        if let Some(dir) = scanner::with_trailing_separator(path) {
            self.spared_dirs.push(dir);
        }
        let parent = path.parent().and_then(scanner::with_trailing_separator);
        let name = path.file_name().and_then(|n| n.to_str());
        if let (Some(dirpath), Some(filename)) = (parent, name) {
            self.spared_files.push((dirpath, filename.to_string()));
        }
    }

    fn spare_file(&mut self, file: &DiskFile) {
        self.spared_files
            .push((file.dirpath.clone(), file.filename.clone()));
    }
}

impl<S: Store> ScanEngine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            registry: ChecksumRegistry::new(),
            options: ScanOptions::default(),
            cancel_token: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_registry(mut self, registry: ChecksumRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Setting the token stops the current scan after the file in progress.
    /// It is reset when a scan starts.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.cancel_token.clone()
    }

    /// Reconcile the tree under `root` with the inventory:
    /// 1. Normalize the root and open a run record
    /// 2. Clear seen bits under the root prefix
    /// 3. Walk, classifying each file as unchanged, updated or new
    /// 4. Sweep entries that were not seen as deleted
    /// 5. Close the run record with the final counters
    pub fn scan(&self, root: &Path, reporter: &dyn ProgressReporter) -> Result<ScanSummary> {
        let base_dir = scanner::normalize_root(root)?;
        self.cancel_token.store(false, Ordering::Relaxed);

        let started = Instant::now();
        let run = self.store.start_run(&base_dir)?;
        info!("Run {} started for {}", run.id, base_dir);
        reporter.on_scan_start(&base_dir);

        let mut tally = Tally::default();
        if let Err(e) = self.reconcile(&base_dir, run.id, &mut tally, reporter) {
            match self
                .store
                .end_run(run.id, RunStatus::Aborted, &tally.counters)
            {
                Ok(_) => warn!("Run {} aborted: {}", run.id, e),
                Err(end_err) => error!(
                    "Run {} aborted ({}) and could not be finalized: {}",
                    run.id, e, end_err
                ),
            }
            return Err(e);
        }

        let record = self
            .store
            .end_run(run.id, RunStatus::Completed, &tally.counters)?;
        let summary = ScanSummary {
            run_id: record.id,
            root: base_dir,
            counters: record.counters,
            errors: tally.errors,
            duration: started.elapsed(),
        };
        info!(
            "Run {} completed in {:.2}s: {} seen, {} new, {} updated, {} unchanged, {} deleted",
            summary.run_id,
            summary.duration.as_secs_f64(),
            summary.counters.files,
            summary.counters.new_files,
            summary.counters.updated,
            summary.counters.unchanged,
            summary.counters.deleted,
        );
        reporter.on_scan_complete(&summary);
        Ok(summary)
    }

    fn reconcile(
        &self,
        base_dir: &str,
        run: RunId,
        tally: &mut Tally,
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        let cleared = self.in_unit(|| self.store.clear_seen_bits(base_dir))?;
        debug!("{} known locations under {}", cleared, base_dir);

        let walker = Walker::new(&self.options);
        for item in walker.walk(Path::new(base_dir)) {
            if self.cancel_token.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            let file = match item {
                Ok(file) => file,
                Err(e) => {
                    warn!("Skipping entry: {}", e);
                    tally.errors += 1;
                    if let Some(path) = e.path() {
                        tally.spare_path(path);
                    }
                    continue;
                }
            };
            tally.counters.files += 1;
            reporter.on_file(tally.counters.files, &file.path);
            self.reconcile_file(&file, run, tally);
        }
        tally.counters.known = tally.counters.unchanged + tally.counters.updated;

        self.sweep(base_dir, run, tally, reporter)?;

        debug!(
            "{} locations tracked under {}",
            self.store.all_file_count(base_dir)?,
            base_dir
        );
        Ok(())
    }

    /// Classify one file. Failures are logged and counted, never propagated.
    fn reconcile_file(&self, file: &DiskFile, run: RunId, tally: &mut Tally) {
        let metadata = match fs::symlink_metadata(&file.path) {
            Ok(m) => m,
            Err(e) => {
                warn!("Error reading metadata for {}: {}", file.path.display(), e);
                tally.errors += 1;
                tally.spare_file(file);
                return;
            }
        };
        let modified = match scanner::modified_nanos(&metadata) {
            Ok(m) => m,
            Err(e) => {
                warn!("Error reading mtime for {}: {}", file.path.display(), e);
                tally.errors += 1;
                tally.spare_file(file);
                return;
            }
        };
        let filesize = metadata.len() as i64;

        let lookup = match self.store.location_for(&file.dirpath, &file.filename) {
            Ok(lookup) => lookup,
            Err(e) => {
                error!("Error looking up {}: {}", file.path.display(), e);
                tally.errors += 1;
                tally.spare_file(file);
                return;
            }
        };

        match lookup {
            Lookup::Found(entry) if entry.modified == modified => {
                match self.store.mark_seen(entry.id) {
                    Ok(()) => tally.counters.unchanged += 1,
                    Err(e) => {
                        error!("Error marking {} seen: {}", file.path.display(), e);
                        tally.errors += 1;
                        tally.spare_file(file);
                    }
                }
            }
            Lookup::Found(entry) => {
                let checksum = digest_file(&file.path);
                let result = self.in_unit(|| {
                    let content = self.register(checksum.as_deref(), file)?;
                    let updated =
                        self.store
                            .update_details(entry.id, modified, content.as_ref(), filesize)?;
                    self.store
                        .record_event(Reason::Updated, RecordType::Location, &updated, run)?;
                    Ok(updated)
                });
                match result {
                    Ok(updated) => {
                        tally.counters.updated += 1;
                        self.trace(Reason::Updated, &updated);
                    }
                    Err(e) => {
                        error!("Error updating {}: {}", file.path.display(), e);
                        tally.errors += 1;
                        tally.spare_file(file);
                    }
                }
            }
            Lookup::NotFound => {
                let checksum = digest_file(&file.path);
                let result = self.in_unit(|| {
                    let content = self.register(checksum.as_deref(), file)?;
                    let created = self.store.insert_location(&NewLocation {
                        dirpath: file.dirpath.clone(),
                        filename: file.filename.clone(),
                        modified,
                        filesize,
                        checksum: content,
                    })?;
                    self.store
                        .record_event(Reason::Created, RecordType::Location, &created, run)?;
                    Ok(created)
                });
                match result {
                    Ok(created) => {
                        tally.counters.new_files += 1;
                        self.trace(Reason::Created, &created);
                    }
                    Err(e) => {
                        error!("Error recording {}: {}", file.path.display(), e);
                        tally.errors += 1;
                    }
                }
            }
        }
    }

    fn register(&self, checksum: Option<&str>, file: &DiskFile) -> Result<Option<ContentRecord>> {
        checksum
            .map(|c| self.registry.register(&self.store, c, &file.path))
            .transpose()
    }

    /// Delete what the walk did not see, after re-marking everything that is
    /// known to still be on disk.
    fn sweep(
        &self,
        base_dir: &str,
        run: RunId,
        tally: &mut Tally,
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        let spared_dirs = &tally.spared_dirs;
        let spared_files = &tally.spared_files;
        let deleted = self.in_unit(|| {
            for dir in spared_dirs {
                let kept = self.store.mark_seen_under(dir)?;
                if kept > 0 {
                    warn!("Keeping {} locations under unreadable {}", kept, dir);
                }
            }
            for (dirpath, filename) in spared_files {
                if let Lookup::Found(entry) = self.store.location_for(dirpath, filename)? {
                    self.store.mark_seen(entry.id)?;
                }
            }

            let unseen = self.store.unseen_location_count(base_dir)?;
            reporter.on_sweep_start(unseen);
            if unseen == 0 {
                return Ok(0);
            }
            let gone = self.store.unseen_locations(base_dir)?;
            for entry in &gone {
                self.store
                    .record_event(Reason::Deleted, RecordType::Location, entry, run)?;
                self.trace(Reason::Deleted, entry);
            }
            let deleted = self.store.delete_unseen_locations(base_dir)?;
            if deleted != unseen || deleted != gone.len() as u64 {
                return Err(Error::Other(format!(
                    "expected to delete {} locations under {}, deleted {}",
                    unseen, base_dir, deleted
                )));
            }
            Ok(deleted)
        })?;
        tally.counters.deleted = deleted;
        Ok(())
    }

    /// Run `f` as one unit of work: committed on success, rolled back on error.
    fn in_unit<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.store.begin()?;
        let result = f().and_then(|value| self.store.commit().map(|_| value));
        if result.is_err() {
            if let Err(e) = self.store.rollback() {
                error!("Rollback failed: {}", e);
            }
        }
        result
    }

    fn trace(&self, reason: Reason, entry: &InventoryEntry) {
        if self.options.trace_changes {
            info!("*{}* {}", reason, entry.full_path());
        } else {
            debug!("*{}* {}", reason, entry.full_path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentReporter;
    use crate::storage::MemoryStore;
    use std::cell::Cell;
    use tempfile::tempdir;

    /// Delegates to a `MemoryStore`, failing a set number of lookups and
    /// seen-bit updates first.
    struct FlakyStore {
        inner: MemoryStore,
        failing_lookups: Cell<u32>,
        failing_marks: Cell<u32>,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                failing_lookups: Cell::new(0),
                failing_marks: Cell::new(0),
            }
        }

        fn trip(counter: &Cell<u32>) -> Result<()> {
            match counter.get() {
                0 => Ok(()),
                n => {
                    counter.set(n - 1);
                    Err(Error::Other("injected failure".to_string()))
                }
            }
        }
    }

    impl Store for FlakyStore {
        fn begin(&self) -> Result<()> {
            self.inner.begin()
        }
        fn commit(&self) -> Result<()> {
            self.inner.commit()
        }
        fn rollback(&self) -> Result<()> {
            self.inner.rollback()
        }
        fn insert_checksum(&self, checksum: &str) -> Result<Registration> {
            self.inner.insert_checksum(checksum)
        }
        fn find_checksum(&self, checksum: &str) -> Result<Option<ContentRecord>> {
            self.inner.find_checksum(checksum)
        }
        fn checksum_count(&self) -> Result<u64> {
            self.inner.checksum_count()
        }
        fn save_token(&self, content: &ContentRecord, token: &TokenPos) -> Result<()> {
            self.inner.save_token(content, token)
        }
        fn tokens_for(&self, checksum: &str) -> Result<Vec<TokenPos>> {
            self.inner.tokens_for(checksum)
        }
        fn location_for(&self, dirpath: &str, filename: &str) -> Result<Lookup> {
            Self::trip(&self.failing_lookups)?;
            self.inner.location_for(dirpath, filename)
        }
        fn insert_location(&self, location: &NewLocation) -> Result<InventoryEntry> {
            self.inner.insert_location(location)
        }
        fn update_details(
            &self,
            id: i64,
            modified: i64,
            checksum: Option<&ContentRecord>,
            filesize: i64,
        ) -> Result<InventoryEntry> {
            self.inner.update_details(id, modified, checksum, filesize)
        }
        fn mark_seen(&self, id: i64) -> Result<()> {
            Self::trip(&self.failing_marks)?;
            self.inner.mark_seen(id)
        }
        fn clear_seen_bits(&self, prefix: &str) -> Result<u64> {
            self.inner.clear_seen_bits(prefix)
        }
        fn mark_seen_under(&self, prefix: &str) -> Result<u64> {
            self.inner.mark_seen_under(prefix)
        }
        fn all_file_count(&self, prefix: &str) -> Result<u64> {
            self.inner.all_file_count(prefix)
        }
        fn unseen_location_count(&self, prefix: &str) -> Result<u64> {
            self.inner.unseen_location_count(prefix)
        }
        fn unseen_locations(&self, prefix: &str) -> Result<Vec<InventoryEntry>> {
            self.inner.unseen_locations(prefix)
        }
        fn delete_unseen_locations(&self, prefix: &str) -> Result<u64> {
            self.inner.delete_unseen_locations(prefix)
        }
        fn start_run(&self, rootdir: &str) -> Result<RunRecord> {
            self.inner.start_run(rootdir)
        }
        fn end_run(
            &self,
            run: RunId,
            status: RunStatus,
            counters: &ScanCounters,
        ) -> Result<RunRecord> {
            self.inner.end_run(run, status, counters)
        }
        fn get_run(&self, id: i64) -> Result<Option<RunRecord>> {
            self.inner.get_run(id)
        }
        fn list_runs(&self, offset: u64, limit: u64) -> Result<Vec<RunRecord>> {
            self.inner.list_runs(offset, limit)
        }
        fn record_event(
            &self,
            reason: Reason,
            rectype: RecordType,
            snapshot: &InventoryEntry,
            run: RunId,
        ) -> Result<AuditEvent> {
            self.inner.record_event(reason, rectype, snapshot, run)
        }
        fn events_for_run(&self, run: RunId) -> Result<Vec<AuditEvent>> {
            self.inner.events_for_run(run)
        }
    }

    #[test]
    fn test_failed_lookup_and_mark_seen_are_not_swept() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        let engine = ScanEngine::new(FlakyStore::new());
        let first = engine.scan(dir.path(), &SilentReporter).unwrap();
        assert_eq!(first.counters.new_files, 2);

        // a.txt fails its lookup, b.txt fails to be marked seen.
        engine.store().failing_lookups.set(1);
        engine.store().failing_marks.set(1);
        let summary = engine.scan(dir.path(), &SilentReporter).unwrap();
        assert_eq!(summary.errors, 2);
        assert_eq!(summary.counters.files, 2);
        assert_eq!(summary.counters.unchanged, 0);
        assert_eq!(summary.counters.deleted, 0);
        assert!(engine
            .store()
            .events_for_run(summary.run_id)
            .unwrap()
            .is_empty());
        assert_eq!(engine.store().all_file_count(&summary.root).unwrap(), 2);

        let run = engine.store().get_run(summary.run_id.get()).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn test_metadata_failure_spares_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        let engine = ScanEngine::new(MemoryStore::new());
        let summary = engine.scan(dir.path(), &SilentReporter).unwrap();
        let base_dir = summary.root;

        let mut tally = Tally::default();
        let vanished = DiskFile {
            path: dir.path().join("vanished.txt"),
            dirpath: base_dir.clone(),
            filename: "vanished.txt".to_string(),
        };
        engine.reconcile_file(&vanished, summary.run_id, &mut tally);
        assert_eq!(tally.errors, 1);
        assert_eq!(
            tally.spared_files,
            vec![(base_dir, "vanished.txt".to_string())]
        );
    }
}
