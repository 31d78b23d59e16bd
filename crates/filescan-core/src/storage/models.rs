use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Identity of a persisted run-ledger record.
///
/// Only storage backends mint these, and only once the row exists, so an
/// audit event can never point at a run that has not been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RunId(i64);

impl RunId {
    pub(crate) fn new(id: i64) -> Self {
        RunId(id)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Deduplicated file content, keyed by its hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentRecord {
    #[serde(skip_serializing)]
    pub id: i64,
    pub checksum: String,
}

/// Outcome of an insert-if-absent on the checksum table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Inserted(ContentRecord),
    Existing(ContentRecord),
}

impl Registration {
    pub fn is_new(&self) -> bool {
        matches!(self, Registration::Inserted(_))
    }

    pub fn record(&self) -> &ContentRecord {
        match self {
            Registration::Inserted(r) | Registration::Existing(r) => r,
        }
    }

    pub fn into_record(self) -> ContentRecord {
        match self {
            Registration::Inserted(r) | Registration::Existing(r) => r,
        }
    }
}

/// Last-known state of one path (`location` row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryEntry {
    pub id: i64,
    pub dirpath: String,
    pub filename: String,
    /// Modification time in nanoseconds since the Unix epoch.
    pub modified: i64,
    pub filesize: i64,
    pub checksum: Option<ContentRecord>,
    pub seen: bool,
}

impl InventoryEntry {
    pub fn full_path(&self) -> String {
        format!("{}{}", self.dirpath, self.filename)
    }
}

#[derive(Debug, Clone)]
pub struct NewLocation {
    pub dirpath: String,
    pub filename: String,
    pub modified: i64,
    pub filesize: i64,
    pub checksum: Option<ContentRecord>,
}

/// Result of looking a path up in the inventory. Absence is an ordinary
/// outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(InventoryEntry),
    NotFound,
}

/// A fact extracted from file content by a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPos {
    pub id: i64,
    pub checksum_id: i64,
    pub ttype: i64,
    pub name: String,
    pub line: i64,
    pub pos: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanCounters {
    pub files: u64,
    pub known: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub new_files: u64,
    pub deleted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Aborted => "aborted",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "aborted" => Ok(RunStatus::Aborted),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

/// One invocation of the engine against one root (`runlog` row).
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: RunId,
    pub when_run: DateTime<Utc>,
    pub when_finished: Option<DateTime<Utc>>,
    pub rootdir: String,
    pub status: RunStatus,
    pub counters: ScanCounters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Created,
    Updated,
    Deleted,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Created => "CREATED",
            Reason::Updated => "UPDATED",
            Reason::Deleted => "DELETED",
        }
    }
}

impl FromStr for Reason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Reason::Created),
            "UPDATED" => Ok(Reason::Updated),
            "DELETED" => Ok(Reason::Deleted),
            other => Err(format!("unknown audit reason '{}'", other)),
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of record an audit event snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Location,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Location => "location",
        }
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "location" => Ok(RecordType::Location),
            other => Err(format!("unknown record type '{}'", other)),
        }
    }
}

/// Append-only audit trail entry (`archive` row).
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub id: i64,
    pub reason: Reason,
    pub rectype: RecordType,
    pub data: serde_json::Value,
    pub run_id: RunId,
}
