use filescan_core::storage::models::*;
use filescan_core::storage::{Database, MemoryStore, Store};
use filescan_core::Error;

const PREFIX: &str = "/home/user/";

fn new_location(dirpath: &str, filename: &str, checksum: Option<ContentRecord>) -> NewLocation {
    NewLocation {
        dirpath: dirpath.to_string(),
        filename: filename.to_string(),
        modified: 1_700_000_000_123_456_789,
        filesize: 1024,
        checksum,
    }
}

fn check_seen_bits(store: &dyn Store) {
    let cs = store.insert_checksum("00ff").unwrap().into_record();
    let mut ids = Vec::new();
    for i in 0..20 {
        let entry = store
            .insert_location(&new_location(PREFIX, &format!("file{:02}.tst", i), Some(cs.clone())))
            .unwrap();
        assert!(entry.seen);
        ids.push(entry.id);
    }

    assert_eq!(store.clear_seen_bits(PREFIX).unwrap(), 20);
    for id in ids.iter().step_by(2) {
        store.mark_seen(*id).unwrap();
    }

    assert_eq!(store.all_file_count(PREFIX).unwrap(), 20);
    assert_eq!(store.unseen_location_count(PREFIX).unwrap(), 10);
    let unseen = store.unseen_locations(PREFIX).unwrap();
    assert_eq!(unseen.len(), 10);
    assert!(unseen.iter().all(|e| !e.seen));

    assert_eq!(store.delete_unseen_locations(PREFIX).unwrap(), 10);
    assert_eq!(store.all_file_count(PREFIX).unwrap(), 10);
    assert_eq!(store.unseen_location_count(PREFIX).unwrap(), 0);
}

fn check_prefix_scoping_is_strict(store: &dyn Store) {
    for dir in ["/data/a/", "/data/a/sub/", "/data/ab/", "/data/a_b/", "/data/a%/", "/other/"] {
        store.insert_location(&new_location(dir, "f.txt", None)).unwrap();
    }

    assert_eq!(store.all_file_count("/data/a/").unwrap(), 2);
    assert_eq!(store.clear_seen_bits("/data/a/").unwrap(), 2);
    assert_eq!(store.unseen_location_count("/data/").unwrap(), 2);
    assert_eq!(store.delete_unseen_locations("/data/a/").unwrap(), 2);

    assert_eq!(store.all_file_count("/data/").unwrap(), 3);
    assert_eq!(store.all_file_count("/").unwrap(), 4);
    assert!(matches!(
        store.location_for("/data/a_b/", "f.txt").unwrap(),
        Lookup::Found(_)
    ));
    assert_eq!(
        store.location_for("/data/a/sub/", "f.txt").unwrap(),
        Lookup::NotFound
    );
}

fn check_checksum_dedup(store: &dyn Store) {
    let first = store.insert_checksum("abc123").unwrap();
    assert!(first.is_new());
    let second = store.insert_checksum("abc123").unwrap();
    assert!(!second.is_new());
    assert_eq!(first.record(), second.record());
    assert_eq!(store.checksum_count().unwrap(), 1);
    assert_eq!(store.find_checksum("abc123").unwrap().as_ref(), Some(first.record()));
    assert_eq!(store.find_checksum("nope").unwrap(), None);
}

fn check_lookup_and_update(store: &dyn Store) {
    assert_eq!(store.location_for(PREFIX, "a.txt").unwrap(), Lookup::NotFound);

    let old = store.insert_checksum("old").unwrap().into_record();
    let new = store.insert_checksum("new").unwrap().into_record();
    let created = store
        .insert_location(&new_location(PREFIX, "a.txt", Some(old.clone())))
        .unwrap();
    assert_eq!(created.checksum.as_ref(), Some(&old));

    store.clear_seen_bits(PREFIX).unwrap();
    let updated = store
        .update_details(created.id, 42, Some(&new), 3_515_506_688)
        .unwrap();
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.modified, 42);
    assert_eq!(updated.filesize, 3_515_506_688);
    assert_eq!(updated.checksum, Some(new));
    assert!(updated.seen);

    match store.location_for(PREFIX, "a.txt").unwrap() {
        Lookup::Found(entry) => assert_eq!(entry, updated),
        Lookup::NotFound => panic!("location should exist"),
    }

    let cleared = store.update_details(created.id, 43, None, 0).unwrap();
    assert_eq!(cleared.checksum, None);
}

fn check_run_ledger(store: &dyn Store) {
    let first = store.start_run("/srv/one/").unwrap();
    assert_eq!(first.status, RunStatus::Running);
    assert!(first.when_finished.is_none());
    assert_eq!(first.counters, ScanCounters::default());

    let counters = ScanCounters {
        files: 6,
        known: 4,
        updated: 1,
        unchanged: 3,
        new_files: 2,
        deleted: 1,
    };
    let finished = store
        .end_run(first.id, RunStatus::Completed, &counters)
        .unwrap();
    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(finished.counters, counters);
    let when_finished = finished.when_finished.expect("end time set");
    assert!(when_finished >= finished.when_run);

    let second = store.start_run("/srv/two/").unwrap();
    let runs = store.list_runs(0, 10).unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].id, second.id);
    assert_eq!(runs[1].id, first.id);
    assert_eq!(store.list_runs(1, 10).unwrap().len(), 1);

    assert_eq!(
        store.get_run(first.id.get()).unwrap().map(|r| r.rootdir),
        Some("/srv/one/".to_string())
    );
    assert!(store.get_run(9_999).unwrap().is_none());
}

fn check_audit_snapshot(store: &dyn Store) {
    let run = store.start_run(PREFIX).unwrap();
    let cs = store.insert_checksum("deadbeef").unwrap().into_record();
    let entry = store
        .insert_location(&new_location(PREFIX, "far_away.txt", Some(cs)))
        .unwrap();
    let bare = store
        .insert_location(&new_location(PREFIX, "unhashable.bin", None))
        .unwrap();

    let event = store
        .record_event(Reason::Created, RecordType::Location, &entry, run.id)
        .unwrap();
    store
        .record_event(Reason::Deleted, RecordType::Location, &bare, run.id)
        .unwrap();

    assert_eq!(event.run_id, run.id);
    assert_eq!(event.data["filename"], "far_away.txt");
    assert_eq!(event.data["dirpath"], PREFIX);
    assert_eq!(event.data["checksum"], serde_json::json!({ "checksum": "deadbeef" }));

    let events = store.events_for_run(run.id).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].reason, Reason::Created);
    assert_eq!(events[0].rectype, RecordType::Location);
    assert_eq!(events[0].data, event.data);
    assert_eq!(events[1].reason, Reason::Deleted);
    assert!(events[1].data["checksum"].is_null());
}

fn check_rollback_discards_unit(store: &dyn Store) {
    store.begin().unwrap();
    store.insert_location(&new_location(PREFIX, "a.txt", None)).unwrap();
    store.insert_checksum("ephemeral").unwrap();
    store.rollback().unwrap();

    assert_eq!(store.location_for(PREFIX, "a.txt").unwrap(), Lookup::NotFound);
    assert_eq!(store.checksum_count().unwrap(), 0);

    store.begin().unwrap();
    store.insert_location(&new_location(PREFIX, "b.txt", None)).unwrap();
    store.commit().unwrap();
    assert!(matches!(
        store.location_for(PREFIX, "b.txt").unwrap(),
        Lookup::Found(_)
    ));
}

fn check_tokens(store: &dyn Store) {
    let cs = store.insert_checksum("py").unwrap().into_record();
    for (name, line, pos) in [("two", 2, 0), ("one", 1, 4), ("three", 2, 6)] {
        store
            .save_token(
                &cs,
                &TokenPos {
                    id: 0,
                    checksum_id: cs.id,
                    ttype: 1,
                    name: name.to_string(),
                    line,
                    pos,
                },
            )
            .unwrap();
    }

    let names: Vec<String> = store
        .tokens_for("py")
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["one", "two", "three"]);
    assert!(store.tokens_for("unknown").unwrap().is_empty());
}

macro_rules! backend_tests {
    ($backend:ident, $make:expr) => {
        mod $backend {
            use super::*;

            #[test]
            fn test_seen_bits() {
                check_seen_bits(&$make);
            }

            #[test]
            fn test_prefix_scoping_is_strict() {
                check_prefix_scoping_is_strict(&$make);
            }

            #[test]
            fn test_checksum_dedup() {
                check_checksum_dedup(&$make);
            }

            #[test]
            fn test_lookup_and_update() {
                check_lookup_and_update(&$make);
            }

            #[test]
            fn test_run_ledger() {
                check_run_ledger(&$make);
            }

            #[test]
            fn test_audit_snapshot() {
                check_audit_snapshot(&$make);
            }

            #[test]
            fn test_rollback_discards_unit() {
                check_rollback_discards_unit(&$make);
            }

            #[test]
            fn test_tokens() {
                check_tokens(&$make);
            }

            #[test]
            fn test_event_for_unknown_run_is_refused() {
                let other = $make;
                let run = other.start_run("/elsewhere/").unwrap();

                let store = $make;
                let entry = store
                    .insert_location(&new_location(PREFIX, "a.txt", None))
                    .unwrap();
                let result =
                    store.record_event(Reason::Created, RecordType::Location, &entry, run.id);
                assert!(matches!(result, Err(Error::MissingRun(id)) if id == run.id.get()));
                assert!(store.events_for_run(run.id).unwrap().is_empty());
            }
        }
    };
}

backend_tests!(sqlite, Database::open_in_memory().unwrap());
backend_tests!(memory, MemoryStore::new());

#[test]
fn test_sqlite_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("filescan.db");

    let run_id = {
        let db = Database::open(&path).unwrap();
        let run = db.start_run(PREFIX).unwrap();
        db.insert_location(&new_location(PREFIX, "kept.txt", None))
            .unwrap();
        run.id.get()
    };

    let db = Database::open(&path).unwrap();
    assert!(db.get_run(run_id).unwrap().is_some());
    assert!(matches!(
        db.location_for(PREFIX, "kept.txt").unwrap(),
        Lookup::Found(_)
    ));
}

#[test]
fn test_sqlite_foreign_keys_enforced() {
    let db = Database::open_in_memory().unwrap();
    let archive = db.connection().execute(
        "INSERT INTO archive (reason, rectype, data, runlog_id) VALUES ('CREATED', 'location', '{}', 77)",
        [],
    );
    assert!(archive.is_err());

    let location = db.connection().execute(
        "INSERT INTO location (dirpath, filename, modified, checksum_id, seen, filesize) \
         VALUES ('/x/', 'y', 0, 77, 1, 0)",
        [],
    );
    assert!(location.is_err());
}

#[test]
fn test_sqlite_truncate_all() {
    let db = Database::open_in_memory().unwrap();
    let run = db.start_run(PREFIX).unwrap();
    let entry = db.insert_location(&new_location(PREFIX, "a", None)).unwrap();
    db.record_event(Reason::Created, RecordType::Location, &entry, run.id)
        .unwrap();
    db.insert_checksum("c").unwrap();

    db.truncate_all().unwrap();
    assert_eq!(db.all_file_count("/").unwrap(), 0);
    assert_eq!(db.checksum_count().unwrap(), 0);
    assert!(db.list_runs(0, 10).unwrap().is_empty());
}

#[test]
fn test_sqlite_concurrent_registration_inserts_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    Database::open(&path).unwrap();

    let writers = 8;
    let dbs: Vec<Database> = (0..writers)
        .map(|_| Database::open(&path).unwrap())
        .collect();
    let barrier = std::sync::Arc::new(std::sync::Barrier::new(writers));

    let handles: Vec<_> = dbs
        .into_iter()
        .map(|db| {
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                db.insert_checksum("same-content").unwrap().is_new()
            })
        })
        .collect();

    let inserted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|new| *new)
        .count();
    assert_eq!(inserted, 1);

    let db = Database::open(&path).unwrap();
    assert_eq!(db.checksum_count().unwrap(), 1);
}
