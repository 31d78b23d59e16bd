pub mod memory;
pub mod models;
pub mod queries;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::Database;

use crate::error::Result;
use models::*;

/// Everything the engine needs from persistence: the inventory, the checksum
/// registry, the run ledger and the audit trail.
///
/// All path scoping takes a normalized directory prefix (absolute, trailing
/// separator) and matches it as a plain string prefix.
///
/// The implementations live in this crate: [`RunId`] can only be minted here,
/// once a run row has been written, and `start_run` has to return one.
pub trait Store {
    // ── Unit of work ─────────────────────────────────────────────

    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;

    // ── Checksum registry ────────────────────────────────────────

    /// Insert the checksum unless it already exists. Must be atomic per
    /// checksum across every writer sharing the store.
    fn insert_checksum(&self, checksum: &str) -> Result<Registration>;
    fn find_checksum(&self, checksum: &str) -> Result<Option<ContentRecord>>;
    fn checksum_count(&self) -> Result<u64>;
    fn save_token(&self, content: &ContentRecord, token: &TokenPos) -> Result<()>;
    fn tokens_for(&self, checksum: &str) -> Result<Vec<TokenPos>>;

    // ── Inventory ────────────────────────────────────────────────

    fn location_for(&self, dirpath: &str, filename: &str) -> Result<Lookup>;
    fn insert_location(&self, location: &NewLocation) -> Result<InventoryEntry>;
    /// Overwrite modified, checksum and size, and mark the entry seen.
    fn update_details(
        &self,
        id: i64,
        modified: i64,
        checksum: Option<&ContentRecord>,
        filesize: i64,
    ) -> Result<InventoryEntry>;
    fn mark_seen(&self, id: i64) -> Result<()>;
    fn clear_seen_bits(&self, prefix: &str) -> Result<u64>;
    /// Mark every entry under `prefix` seen, e.g. a subtree the walk could
    /// not read.
    fn mark_seen_under(&self, prefix: &str) -> Result<u64>;
    fn all_file_count(&self, prefix: &str) -> Result<u64>;
    fn unseen_location_count(&self, prefix: &str) -> Result<u64>;
    fn unseen_locations(&self, prefix: &str) -> Result<Vec<InventoryEntry>>;
    fn delete_unseen_locations(&self, prefix: &str) -> Result<u64>;

    // ── Run ledger ───────────────────────────────────────────────

    /// Create a `running` record; it is durable when this returns.
    fn start_run(&self, rootdir: &str) -> Result<RunRecord>;
    fn end_run(&self, run: RunId, status: RunStatus, counters: &ScanCounters)
        -> Result<RunRecord>;
    fn get_run(&self, id: i64) -> Result<Option<RunRecord>>;
    /// Newest first.
    fn list_runs(&self, offset: u64, limit: u64) -> Result<Vec<RunRecord>>;

    // ── Audit trail ──────────────────────────────────────────────

    fn record_event(
        &self,
        reason: Reason,
        rectype: RecordType,
        snapshot: &InventoryEntry,
        run: RunId,
    ) -> Result<AuditEvent>;
    fn events_for_run(&self, run: RunId) -> Result<Vec<AuditEvent>>;
}
