use super::models::*;
use super::sqlite::Database;
use super::Store;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

const LOCATION_COLUMNS: &str = "l.id, l.dirpath, l.filename, l.modified, l.filesize, l.seen, \
     c.id, c.checksum \
     FROM location l LEFT JOIN checksum c ON c.id = l.checksum_id";

const RUN_COLUMNS: &str = "id, when_run, when_finished, rootdir, status, \
     files, known, updated, unchanged, new_files, deleted FROM runlog";

// Strict prefix comparison; LIKE would treat `_` and `%` in paths as wildcards.
const UNDER_PREFIX: &str = "substr(dirpath, 1, length(?1)) = ?1";

fn location_from_row(row: &Row<'_>) -> rusqlite::Result<InventoryEntry> {
    let checksum_id: Option<i64> = row.get(6)?;
    let checksum: Option<String> = row.get(7)?;
    Ok(InventoryEntry {
        id: row.get(0)?,
        dirpath: row.get(1)?,
        filename: row.get(2)?,
        modified: row.get(3)?,
        filesize: row.get(4)?,
        seen: row.get(5)?,
        checksum: checksum_id
            .zip(checksum)
            .map(|(id, checksum)| ContentRecord { id, checksum }),
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let status: String = row.get(4)?;
    let status = status.parse::<RunStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into())
    })?;
    Ok(RunRecord {
        id: RunId::new(row.get(0)?),
        when_run: row.get(1)?,
        when_finished: row.get(2)?,
        rootdir: row.get(3)?,
        status,
        counters: ScanCounters {
            files: row.get::<_, i64>(5)? as u64,
            known: row.get::<_, i64>(6)? as u64,
            updated: row.get::<_, i64>(7)? as u64,
            unchanged: row.get::<_, i64>(8)? as u64,
            new_files: row.get::<_, i64>(9)? as u64,
            deleted: row.get::<_, i64>(10)? as u64,
        },
    })
}

impl Database {
    fn location_by_id(&self, id: i64) -> Result<InventoryEntry> {
        let sql = format!("SELECT {} WHERE l.id = ?1", LOCATION_COLUMNS);
        let entry = self
            .connection()
            .query_row(&sql, params![id], location_from_row)?;
        Ok(entry)
    }

    fn run_exists(&self, run: RunId) -> Result<bool> {
        let count: i64 = self.connection().query_row(
            "SELECT COUNT(*) FROM runlog WHERE id = ?1",
            params![run.get()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

impl Store for Database {
    // ── Unit of work ─────────────────────────────────────────────

    fn begin(&self) -> Result<()> {
        self.connection().execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.connection().execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        // A failed COMMIT may already have ended the transaction.
        if !self.connection().is_autocommit() {
            self.connection().execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    // ── Checksum registry ────────────────────────────────────────

    fn insert_checksum(&self, checksum: &str) -> Result<Registration> {
        let inserted = self.connection().execute(
            "INSERT INTO checksum (checksum) VALUES (?1) ON CONFLICT(checksum) DO NOTHING",
            params![checksum],
        )?;
        let id: i64 = self.connection().query_row(
            "SELECT id FROM checksum WHERE checksum = ?1",
            params![checksum],
            |row| row.get(0),
        )?;
        let record = ContentRecord {
            id,
            checksum: checksum.to_string(),
        };
        if inserted == 1 {
            Ok(Registration::Inserted(record))
        } else {
            Ok(Registration::Existing(record))
        }
    }

    fn find_checksum(&self, checksum: &str) -> Result<Option<ContentRecord>> {
        let record = self
            .connection()
            .query_row(
                "SELECT id, checksum FROM checksum WHERE checksum = ?1",
                params![checksum],
                |row| {
                    Ok(ContentRecord {
                        id: row.get(0)?,
                        checksum: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn checksum_count(&self) -> Result<u64> {
        let count: i64 =
            self.connection()
                .query_row("SELECT COUNT(*) FROM checksum", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn save_token(&self, content: &ContentRecord, token: &TokenPos) -> Result<()> {
        let mut stmt = self.connection().prepare_cached(
            "INSERT INTO tokenpos (checksum_id, ttype, name, line, pos) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        stmt.execute(params![
            content.id,
            token.ttype,
            token.name,
            token.line,
            token.pos
        ])?;
        Ok(())
    }

    fn tokens_for(&self, checksum: &str) -> Result<Vec<TokenPos>> {
        let mut stmt = self.connection().prepare(
            "SELECT t.id, t.checksum_id, t.ttype, t.name, t.line, t.pos \
             FROM tokenpos t JOIN checksum c ON c.id = t.checksum_id \
             WHERE c.checksum = ?1 ORDER BY t.line, t.pos",
        )?;
        let tokens = stmt
            .query_map(params![checksum], |row| {
                Ok(TokenPos {
                    id: row.get(0)?,
                    checksum_id: row.get(1)?,
                    ttype: row.get(2)?,
                    name: row.get(3)?,
                    line: row.get(4)?,
                    pos: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tokens)
    }

    // ── Inventory ────────────────────────────────────────────────

    fn location_for(&self, dirpath: &str, filename: &str) -> Result<Lookup> {
        let sql = format!(
            "SELECT {} WHERE l.dirpath = ?1 AND l.filename = ?2",
            LOCATION_COLUMNS
        );
        let entry = self
            .connection()
            .query_row(&sql, params![dirpath, filename], location_from_row)
            .optional()?;
        Ok(match entry {
            Some(entry) => Lookup::Found(entry),
            None => Lookup::NotFound,
        })
    }

    fn insert_location(&self, location: &NewLocation) -> Result<InventoryEntry> {
        self.connection().execute(
            "INSERT INTO location (dirpath, filename, modified, checksum_id, seen, filesize) \
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![
                location.dirpath,
                location.filename,
                location.modified,
                location.checksum.as_ref().map(|c| c.id),
                location.filesize
            ],
        )?;
        let id = self.connection().last_insert_rowid();
        self.location_by_id(id)
    }

    fn update_details(
        &self,
        id: i64,
        modified: i64,
        checksum: Option<&ContentRecord>,
        filesize: i64,
    ) -> Result<InventoryEntry> {
        self.connection().execute(
            "UPDATE location SET modified = ?1, checksum_id = ?2, filesize = ?3, seen = 1 \
             WHERE id = ?4",
            params![modified, checksum.map(|c| c.id), filesize, id],
        )?;
        self.location_by_id(id)
    }

    fn mark_seen(&self, id: i64) -> Result<()> {
        self.connection()
            .execute("UPDATE location SET seen = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn clear_seen_bits(&self, prefix: &str) -> Result<u64> {
        let sql = format!("UPDATE location SET seen = 0 WHERE {}", UNDER_PREFIX);
        let cleared = self.connection().execute(&sql, params![prefix])?;
        debug!("Cleared seen bit on {} locations under {}", cleared, prefix);
        Ok(cleared as u64)
    }

    fn mark_seen_under(&self, prefix: &str) -> Result<u64> {
        let sql = format!("UPDATE location SET seen = 1 WHERE {}", UNDER_PREFIX);
        let marked = self.connection().execute(&sql, params![prefix])?;
        debug!("Marked {} locations under {} seen", marked, prefix);
        Ok(marked as u64)
    }

    fn all_file_count(&self, prefix: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM location WHERE {}", UNDER_PREFIX);
        let count: i64 = self
            .connection()
            .query_row(&sql, params![prefix], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn unseen_location_count(&self, prefix: &str) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM location WHERE {} AND seen = 0",
            UNDER_PREFIX
        );
        let count: i64 = self
            .connection()
            .query_row(&sql, params![prefix], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn unseen_locations(&self, prefix: &str) -> Result<Vec<InventoryEntry>> {
        let sql = format!(
            "SELECT {} WHERE substr(l.dirpath, 1, length(?1)) = ?1 AND l.seen = 0 \
             ORDER BY l.dirpath, l.filename",
            LOCATION_COLUMNS
        );
        let mut stmt = self.connection().prepare(&sql)?;
        let entries = stmt
            .query_map(params![prefix], location_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn delete_unseen_locations(&self, prefix: &str) -> Result<u64> {
        let sql = format!("DELETE FROM location WHERE {} AND seen = 0", UNDER_PREFIX);
        let deleted = self.connection().execute(&sql, params![prefix])?;
        Ok(deleted as u64)
    }

    // ── Run ledger ───────────────────────────────────────────────

    fn start_run(&self, rootdir: &str) -> Result<RunRecord> {
        let now: DateTime<Utc> = Utc::now();
        self.connection().execute(
            "INSERT INTO runlog (when_run, rootdir, status) VALUES (?1, ?2, 'running')",
            params![now, rootdir],
        )?;
        let id = self.connection().last_insert_rowid();
        debug!("Started run {} for {}", id, rootdir);
        self.get_run(id)?.ok_or(Error::MissingRun(id))
    }

    fn end_run(
        &self,
        run: RunId,
        status: RunStatus,
        counters: &ScanCounters,
    ) -> Result<RunRecord> {
        let now: DateTime<Utc> = Utc::now();
        self.connection().execute(
            "UPDATE runlog SET when_finished = ?1, status = ?2, files = ?3, known = ?4, \
             updated = ?5, unchanged = ?6, new_files = ?7, deleted = ?8 WHERE id = ?9",
            params![
                now,
                status.as_str(),
                counters.files as i64,
                counters.known as i64,
                counters.updated as i64,
                counters.unchanged as i64,
                counters.new_files as i64,
                counters.deleted as i64,
                run.get()
            ],
        )?;
        self.get_run(run.get())?.ok_or(Error::MissingRun(run.get()))
    }

    fn get_run(&self, id: i64) -> Result<Option<RunRecord>> {
        let sql = format!("SELECT {} WHERE id = ?1", RUN_COLUMNS);
        let run = self
            .connection()
            .query_row(&sql, params![id], run_from_row)
            .optional()?;
        Ok(run)
    }

    fn list_runs(&self, offset: u64, limit: u64) -> Result<Vec<RunRecord>> {
        let sql = format!("SELECT {} ORDER BY id DESC LIMIT ?1 OFFSET ?2", RUN_COLUMNS);
        let mut stmt = self.connection().prepare(&sql)?;
        let runs = stmt
            .query_map(params![limit as i64, offset as i64], run_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    // ── Audit trail ──────────────────────────────────────────────

    fn record_event(
        &self,
        reason: Reason,
        rectype: RecordType,
        snapshot: &InventoryEntry,
        run: RunId,
    ) -> Result<AuditEvent> {
        if !self.run_exists(run)? {
            return Err(Error::MissingRun(run.get()));
        }
        let data = serde_json::to_value(snapshot)?;
        self.connection().execute(
            "INSERT INTO archive (reason, rectype, data, runlog_id) VALUES (?1, ?2, ?3, ?4)",
            params![reason.as_str(), rectype.as_str(), data.to_string(), run.get()],
        )?;
        Ok(AuditEvent {
            id: self.connection().last_insert_rowid(),
            reason,
            rectype,
            data,
            run_id: run,
        })
    }

    fn events_for_run(&self, run: RunId) -> Result<Vec<AuditEvent>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, reason, rectype, data FROM archive WHERE runlog_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![run.get()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, reason, rectype, data)| {
                Ok(AuditEvent {
                    id,
                    reason: reason.parse().map_err(Error::Other)?,
                    rectype: rectype.parse().map_err(Error::Other)?,
                    data: serde_json::from_str(&data)?,
                    run_id: run,
                })
            })
            .collect()
    }
}
