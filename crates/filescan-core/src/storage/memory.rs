use super::models::*;
use super::Store;
use crate::error::{Error, Result};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct LocationRow {
    dirpath: String,
    filename: String,
    modified: i64,
    filesize: i64,
    checksum_id: Option<i64>,
    seen: bool,
}

/// How to reverse one write made inside an open unit of work.
#[derive(Debug)]
enum Undo {
    Checksum(i64),
    /// Row as it was before the write; `None` if it did not exist.
    Location(i64, Option<LocationRow>),
    Token,
    Run(i64, Option<RunRecord>),
    Event,
}

#[derive(Debug, Default)]
struct MemoryState {
    checksums: BTreeMap<i64, String>,
    checksum_ids: HashMap<String, i64>,
    locations: BTreeMap<i64, LocationRow>,
    location_ids: HashMap<(String, String), i64>,
    tokens: Vec<TokenPos>,
    runs: BTreeMap<i64, RunRecord>,
    events: Vec<AuditEvent>,
    last_id: i64,
    /// Open while a unit of work is in progress.
    journal: Option<Vec<Undo>>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn record(&mut self, undo: Undo) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(undo);
        }
    }

    fn undo(&mut self, undo: Undo) {
        match undo {
            Undo::Checksum(id) => {
                if let Some(checksum) = self.checksums.remove(&id) {
                    self.checksum_ids.remove(&checksum);
                }
            }
            Undo::Location(id, previous) => self.put_location(id, previous),
            Undo::Token => {
                self.tokens.pop();
            }
            Undo::Run(id, Some(previous)) => {
                self.runs.insert(id, previous);
            }
            Undo::Run(id, None) => {
                self.runs.remove(&id);
            }
            Undo::Event => {
                self.events.pop();
            }
        }
    }

    /// Replace (or remove) a location row, keeping the path index in step.
    fn put_location(&mut self, id: i64, row: Option<LocationRow>) {
        if let Some(old) = self.locations.remove(&id) {
            self.location_ids.remove(&(old.dirpath, old.filename));
        }
        if let Some(row) = row {
            self.location_ids
                .insert((row.dirpath.clone(), row.filename.clone()), id);
            self.locations.insert(id, row);
        }
    }

    /// Apply `change` to one row, journaling its previous state.
    fn modify_location(&mut self, id: i64, change: impl FnOnce(&mut LocationRow)) -> Result<()> {
        let row = self
            .locations
            .get_mut(&id)
            .ok_or_else(|| Error::Other(format!("location {} does not exist", id)))?;
        let before = row.clone();
        change(row);
        self.record(Undo::Location(id, Some(before)));
        Ok(())
    }

    fn entry(&self, id: i64) -> Result<InventoryEntry> {
        let row = self
            .locations
            .get(&id)
            .ok_or_else(|| Error::Other(format!("location {} does not exist", id)))?;
        Ok(InventoryEntry {
            id,
            dirpath: row.dirpath.clone(),
            filename: row.filename.clone(),
            modified: row.modified,
            filesize: row.filesize,
            checksum: row.checksum_id.and_then(|cid| {
                self.checksums.get(&cid).map(|checksum| ContentRecord {
                    id: cid,
                    checksum: checksum.clone(),
                })
            }),
            seen: row.seen,
        })
    }

    fn ids_under(&self, prefix: &str, unseen_only: bool) -> Vec<i64> {
        self.locations
            .iter()
            .filter(|(_, row)| row.dirpath.starts_with(prefix) && !(unseen_only && row.seen))
            .map(|(id, _)| *id)
            .collect()
    }

    fn check_checksum(&self, checksum: Option<&ContentRecord>) -> Result<()> {
        match checksum {
            Some(c) if !self.checksums.contains_key(&c.id) => Err(Error::Other(format!(
                "checksum {} does not exist",
                c.id
            ))),
            _ => Ok(()),
        }
    }
}

/// In-process store. Rows live behind a mutex; a unit of work journals how
/// to undo each write and replays the journal backwards on rollback. Only
/// one unit may be open at a time.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| Error::Other(format!("Failed to lock memory store: {}", e)))
    }
}

impl Store for MemoryStore {
    fn begin(&self) -> Result<()> {
        let mut state = self.state()?;
        if state.journal.is_some() {
            return Err(Error::Other("a unit of work is already open".to_string()));
        }
        state.journal = Some(Vec::new());
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.state()?.journal = None;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut state = self.state()?;
        if let Some(journal) = state.journal.take() {
            for undo in journal.into_iter().rev() {
                state.undo(undo);
            }
        }
        Ok(())
    }

    fn insert_checksum(&self, checksum: &str) -> Result<Registration> {
        let mut state = self.state()?;
        if let Some(&id) = state.checksum_ids.get(checksum) {
            return Ok(Registration::Existing(ContentRecord {
                id,
                checksum: checksum.to_string(),
            }));
        }
        let id = state.next_id();
        state.checksums.insert(id, checksum.to_string());
        state.checksum_ids.insert(checksum.to_string(), id);
        state.record(Undo::Checksum(id));
        Ok(Registration::Inserted(ContentRecord {
            id,
            checksum: checksum.to_string(),
        }))
    }

    fn find_checksum(&self, checksum: &str) -> Result<Option<ContentRecord>> {
        let state = self.state()?;
        Ok(state.checksum_ids.get(checksum).map(|&id| ContentRecord {
            id,
            checksum: checksum.to_string(),
        }))
    }

    fn checksum_count(&self) -> Result<u64> {
        Ok(self.state()?.checksums.len() as u64)
    }

    fn save_token(&self, content: &ContentRecord, token: &TokenPos) -> Result<()> {
        let mut state = self.state()?;
        state.check_checksum(Some(content))?;
        let id = state.next_id();
        state.tokens.push(TokenPos {
            id,
            checksum_id: content.id,
            ..token.clone()
        });
        state.record(Undo::Token);
        Ok(())
    }

    fn tokens_for(&self, checksum: &str) -> Result<Vec<TokenPos>> {
        let state = self.state()?;
        let Some(&cid) = state.checksum_ids.get(checksum) else {
            return Ok(Vec::new());
        };
        let mut tokens: Vec<TokenPos> = state
            .tokens
            .iter()
            .filter(|t| t.checksum_id == cid)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| (t.line, t.pos));
        Ok(tokens)
    }

    fn location_for(&self, dirpath: &str, filename: &str) -> Result<Lookup> {
        let state = self.state()?;
        let key = (dirpath.to_string(), filename.to_string());
        match state.location_ids.get(&key) {
            Some(&id) => Ok(Lookup::Found(state.entry(id)?)),
            None => Ok(Lookup::NotFound),
        }
    }

    fn insert_location(&self, location: &NewLocation) -> Result<InventoryEntry> {
        let mut state = self.state()?;
        state.check_checksum(location.checksum.as_ref())?;
        let key = (location.dirpath.clone(), location.filename.clone());
        if state.location_ids.contains_key(&key) {
            return Err(Error::Other(format!(
                "location {}{} already exists",
                location.dirpath, location.filename
            )));
        }
        let id = state.next_id();
        state.put_location(
            id,
            Some(LocationRow {
                dirpath: location.dirpath.clone(),
                filename: location.filename.clone(),
                modified: location.modified,
                filesize: location.filesize,
                checksum_id: location.checksum.as_ref().map(|c| c.id),
                seen: true,
            }),
        );
        state.record(Undo::Location(id, None));
        state.entry(id)
    }

    fn update_details(
        &self,
        id: i64,
        modified: i64,
        checksum: Option<&ContentRecord>,
        filesize: i64,
    ) -> Result<InventoryEntry> {
        let mut state = self.state()?;
        state.check_checksum(checksum)?;
        state.modify_location(id, |row| {
            row.modified = modified;
            row.checksum_id = checksum.map(|c| c.id);
            row.filesize = filesize;
            row.seen = true;
        })?;
        state.entry(id)
    }

    fn mark_seen(&self, id: i64) -> Result<()> {
        let mut state = self.state()?;
        if state.locations.contains_key(&id) {
            state.modify_location(id, |row| row.seen = true)?;
        }
        Ok(())
    }

    fn clear_seen_bits(&self, prefix: &str) -> Result<u64> {
        let mut state = self.state()?;
        let ids = state.ids_under(prefix, false);
        for &id in &ids {
            state.modify_location(id, |row| row.seen = false)?;
        }
        Ok(ids.len() as u64)
    }

    fn mark_seen_under(&self, prefix: &str) -> Result<u64> {
        let mut state = self.state()?;
        let ids = state.ids_under(prefix, true);
        for &id in &ids {
            state.modify_location(id, |row| row.seen = true)?;
        }
        Ok(ids.len() as u64)
    }

    fn all_file_count(&self, prefix: &str) -> Result<u64> {
        Ok(self.state()?.ids_under(prefix, false).len() as u64)
    }

    fn unseen_location_count(&self, prefix: &str) -> Result<u64> {
        Ok(self.state()?.ids_under(prefix, true).len() as u64)
    }

    fn unseen_locations(&self, prefix: &str) -> Result<Vec<InventoryEntry>> {
        let state = self.state()?;
        let mut entries = state
            .ids_under(prefix, true)
            .into_iter()
            .map(|id| state.entry(id))
            .collect::<Result<Vec<_>>>()?;
        entries.sort_by(|a, b| (&a.dirpath, &a.filename).cmp(&(&b.dirpath, &b.filename)));
        Ok(entries)
    }

    fn delete_unseen_locations(&self, prefix: &str) -> Result<u64> {
        let mut state = self.state()?;
        let ids = state.ids_under(prefix, true);
        for &id in &ids {
            let before = state.locations.get(&id).cloned();
            state.put_location(id, None);
            state.record(Undo::Location(id, before));
        }
        Ok(ids.len() as u64)
    }

    fn start_run(&self, rootdir: &str) -> Result<RunRecord> {
        let mut state = self.state()?;
        let id = state.next_id();
        let run = RunRecord {
            id: RunId::new(id),
            when_run: Utc::now(),
            when_finished: None,
            rootdir: rootdir.to_string(),
            status: RunStatus::Running,
            counters: ScanCounters::default(),
        };
        state.runs.insert(id, run.clone());
        state.record(Undo::Run(id, None));
        Ok(run)
    }

    fn end_run(
        &self,
        run: RunId,
        status: RunStatus,
        counters: &ScanCounters,
    ) -> Result<RunRecord> {
        let mut state = self.state()?;
        let record = state
            .runs
            .get_mut(&run.get())
            .ok_or(Error::MissingRun(run.get()))?;
        let before = record.clone();
        record.when_finished = Some(Utc::now());
        record.status = status;
        record.counters = *counters;
        let after = record.clone();
        state.record(Undo::Run(run.get(), Some(before)));
        Ok(after)
    }

    fn get_run(&self, id: i64) -> Result<Option<RunRecord>> {
        Ok(self.state()?.runs.get(&id).cloned())
    }

    fn list_runs(&self, offset: u64, limit: u64) -> Result<Vec<RunRecord>> {
        let state = self.state()?;
        Ok(state
            .runs
            .values()
            .rev()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    fn record_event(
        &self,
        reason: Reason,
        rectype: RecordType,
        snapshot: &InventoryEntry,
        run: RunId,
    ) -> Result<AuditEvent> {
        let mut state = self.state()?;
        if !state.runs.contains_key(&run.get()) {
            return Err(Error::MissingRun(run.get()));
        }
        let event = AuditEvent {
            id: state.next_id(),
            reason,
            rectype,
            data: serde_json::to_value(snapshot)?,
            run_id: run,
        };
        state.events.push(event.clone());
        state.record(Undo::Event);
        Ok(event)
    }

    fn events_for_run(&self, run: RunId) -> Result<Vec<AuditEvent>> {
        let state = self.state()?;
        Ok(state
            .events
            .iter()
            .filter(|e| e.run_id == run)
            .cloned()
            .collect())
    }
}
