//! End-to-end tests for the property store

use super::*;
use crate::persistence::{replay_audit_log, AuditLog};
use semstore_diff::DiffSide;
use tempfile::tempdir;

/// Helper to create a persisted test store
fn test_store() -> (PropertyStore, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let store = PropertyStore::new(test_config(dir.path())).unwrap();
    (store, dir)
}

fn test_config(dir: &std::path::Path) -> StorageConfig {
    StorageConfig {
        changelog_path: dir.join("changelog.json"),
        audit_log_path: dir.join("audit.log"),
        persist_audit: true,
        max_changelog: 100,
        record_empty_updates: false,
    }
}

fn date_row(serialized: &str, sortkey: &str) -> Row {
    Row::new()
        .with_payload("o_serialized", serialized)
        .with_payload("o_sortkey", sortkey)
}

fn first_annotation() -> SemanticData {
    SemanticData::new()
        .with_row("wikipage_refs", Row::triple(1706, 1707, 388))
        .with_row("dates", date_row("1/2015/8/8/18/51/39", "2457243.2858681"))
}

fn second_annotation() -> SemanticData {
    SemanticData::new()
        .with_row("wikipage_refs", Row::triple(1706, 1707, 296))
        .with_row("dates", date_row("1/2015/8/8/19/2/39", "2457243.2935069"))
}

fn set(ids: &[u64]) -> std::collections::BTreeSet<u64> {
    ids.iter().copied().collect()
}

struct FailingListener;

impl ChangeListener for FailingListener {
    fn on_change(&self, _outcome: &UpdateOutcome) -> anyhow::Result<()> {
        Err(anyhow!("queue unavailable"))
    }
}

#[test]
fn test_first_annotation_inserts_everything() {
    let (store, _dir) = test_store();

    let outcome = store.update_subject(1706, &first_annotation()).unwrap();

    assert!(outcome.change_id.is_some());
    assert_eq!(outcome.plan.reindex.to_set(), set(&[1707, 1706, 388]));
    assert!(outcome.plan.evict.is_empty());
    assert_eq!(store.rows_for_subject("wikipage_refs", 1706).len(), 1);
    assert_eq!(store.rows_for_subject("dates", 1706).len(), 1);
}

#[test]
fn test_reannotation_touches_only_changed_rows() {
    let (store, _dir) = test_store();
    store.update_subject(1706, &first_annotation()).unwrap();

    let outcome = store.update_subject(1706, &second_annotation()).unwrap();

    assert_eq!(outcome.plan.reindex.to_set(), set(&[1707, 1706, 296]));
    assert_eq!(outcome.plan.evict.to_set(), set(&[1707, 1706, 388]));

    let refs = outcome.diff.get("wikipage_refs").unwrap();
    assert_eq!(refs.insert, vec![Row::triple(1706, 1707, 296)]);
    assert_eq!(refs.delete, vec![Row::triple(1706, 1707, 388)]);
    assert_eq!(store.rows("wikipage_refs"), vec![Row::triple(1706, 1707, 296)]);
}

#[test]
fn test_identical_reannotation_is_noop() {
    let (store, _dir) = test_store();
    store.update_subject(1706, &first_annotation()).unwrap();

    let outcome = store.update_subject(1706, &first_annotation()).unwrap();

    assert!(outcome.diff.is_empty());
    assert!(outcome.plan.is_empty());
    assert!(outcome.change_id.is_none());
    assert_eq!(store.changelog().len(), 1);
}

#[test]
fn test_record_empty_updates() {
    let dir = tempdir().unwrap();
    let config = StorageConfig {
        record_empty_updates: true,
        ..test_config(dir.path())
    };
    let store = PropertyStore::new(config).unwrap();

    let outcome = store.update_subject(5, &SemanticData::new()).unwrap();
    assert!(outcome.change_id.is_some());
    assert_eq!(store.changelog().len(), 1);
}

#[test]
fn test_unchanged_rows_survive_partial_update() {
    let (store, _dir) = test_store();
    let data = first_annotation().with_row("wikipage_refs", Row::triple(1706, 9, 10));
    store.update_subject(1706, &data).unwrap();

    let next = second_annotation().with_row("wikipage_refs", Row::triple(1706, 9, 10));
    let outcome = store.update_subject(1706, &next).unwrap();

    assert!(!outcome.plan.affected().contains(9));
    assert!(!outcome.plan.affected().contains(10));
    assert_eq!(store.rows_for_subject("wikipage_refs", 1706).len(), 2);
}

#[test]
fn test_dropped_table_rows_are_deleted() {
    let (store, _dir) = test_store();
    store.update_subject(1706, &first_annotation()).unwrap();

    let only_refs = SemanticData::new().with_row("wikipage_refs", Row::triple(1706, 1707, 388));
    let outcome = store.update_subject(1706, &only_refs).unwrap();

    assert_eq!(outcome.diff.table_names(), vec!["dates"]);
    assert_eq!(outcome.diff.row_count(Some(DiffSide::Delete)), 1);
    assert!(store.rows("dates").is_empty());
    assert!(!store.table_names().contains(&"dates".to_string()));
}

#[test]
fn test_other_subjects_are_untouched() {
    let (store, _dir) = test_store();
    store.update_subject(1706, &first_annotation()).unwrap();
    store
        .update_subject(
            2000,
            &SemanticData::new().with_row("wikipage_refs", Row::triple(2000, 1707, 388)),
        )
        .unwrap();

    let outcome = store.delete_subject(1706).unwrap();

    assert_eq!(outcome.plan.evict.to_set(), set(&[1707, 1706, 388]));
    assert_eq!(store.rows("wikipage_refs"), vec![Row::triple(2000, 1707, 388)]);
}

#[test]
fn test_rows_for_another_subject_are_rejected() {
    let (store, _dir) = test_store();
    let bad = SemanticData::new().with_row("wikipage_refs", Row::triple(99, 1707, 388));

    let err = store.update_subject(1706, &bad).unwrap_err();
    assert!(err.to_string().contains("belongs to subject 99"));
    assert!(store.rows("wikipage_refs").is_empty());
}

#[test]
fn test_listeners_receive_plans() {
    let (store, _dir) = test_store();
    let recorder = Arc::new(RecordingListener::default());
    let queue = Arc::new(PropagationQueue::default());
    store.subscribe(recorder.clone());
    store.subscribe(Arc::new(FailingListener));
    store.subscribe(queue.clone());

    store.update_subject(1706, &first_annotation()).unwrap();
    store.update_subject(1706, &second_annotation()).unwrap();

    let events = recorder.take();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].plan.evict.to_set(), set(&[1707, 1706, 388]));

    let pending = queue.drain();
    assert_eq!(pending.reindex.to_set(), set(&[1707, 1706, 388, 296]));
    assert_eq!(pending.evict.to_set(), set(&[1707, 1706, 388]));
    assert!(queue.is_empty());
}

#[test]
fn test_rollback_restores_rows() {
    let (store, _dir) = test_store();
    let recorder = Arc::new(RecordingListener::default());

    let first = store.update_subject(1706, &first_annotation()).unwrap();
    store.update_subject(1706, &second_annotation()).unwrap();
    let before_rollback = store.changelog();
    store.subscribe(recorder.clone());

    let outcomes = store.rollback_to(first.change_id.unwrap()).unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].plan.reindex.to_set(), set(&[1707, 1706, 388]));
    assert_eq!(store.rows("wikipage_refs"), vec![Row::triple(1706, 1707, 388)]);
    assert_eq!(recorder.events().len(), 1);

    let changelog = store.changelog();
    assert_eq!(changelog.len(), before_rollback.len());
    assert_eq!(changelog[0].status, ChangeStatus::Applied);
    assert!(matches!(changelog[1].status, ChangeStatus::RolledBack { .. }));
}

#[test]
fn test_rollback_unknown_change_fails() {
    let (store, _dir) = test_store();
    let err = store.rollback_to(Uuid::new_v4()).unwrap_err();
    assert!(err.to_string().contains("Change not found"));
}

#[test]
fn test_changelog_persistence() {
    let (store, dir) = test_store();

    for subject in 0..3u64 {
        store
            .update_subject(
                subject,
                &SemanticData::new().with_row("wikipage_refs", Row::triple(subject, 1, 2)),
            )
            .unwrap();
    }
    store.flush().unwrap();

    let changelog_path = dir.path().join("changelog.json");
    assert!(changelog_path.exists());
    let contents = std::fs::read_to_string(&changelog_path).unwrap();
    let changelog: Vec<AuditEntry> = serde_json::from_str(&contents).unwrap();
    assert_eq!(changelog.len(), 3, "Should have 3 changes");
    assert!(changelog.iter().all(|c| c.status == ChangeStatus::Applied));
    assert_eq!(changelog[2].diff.ids(None).to_set(), set(&[1, 2]));
}

#[test]
fn test_reopen_rebuilds_tables_from_audit_log() {
    let dir = tempdir().unwrap();
    {
        let store = PropertyStore::new(test_config(dir.path())).unwrap();
        let first = store.update_subject(1706, &first_annotation()).unwrap();
        store.update_subject(1706, &second_annotation()).unwrap();
        store.rollback_to(first.change_id.unwrap()).unwrap();
        store.flush().unwrap();
    }

    let reopened = PropertyStore::new(test_config(dir.path())).unwrap();
    assert_eq!(reopened.rows("wikipage_refs"), vec![Row::triple(1706, 1707, 388)]);
    assert_eq!(reopened.changelog().len(), 2);

    let replayed = replay_audit_log(&dir.path().join("audit.log")).unwrap();
    assert_eq!(replayed, reopened.snapshot());
}

#[test]
fn test_audit_log_records_compensations() {
    let (store, dir) = test_store();
    let first = store.update_subject(1706, &first_annotation()).unwrap();
    let second = store.update_subject(1706, &second_annotation()).unwrap();
    store.rollback_to(first.change_id.unwrap()).unwrap();

    let log = AuditLog::open(&dir.path().join("audit.log")).unwrap();
    let entries = log.read_all().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2].reverts, second.change_id);
    assert_eq!(
        entries[2].diff.ids(Some(DiffSide::Insert)),
        second.diff.ids(Some(DiffSide::Delete))
    );
}

#[test]
fn test_changelog_is_bounded() {
    let dir = tempdir().unwrap();
    let config = StorageConfig {
        max_changelog: 2,
        ..test_config(dir.path())
    };
    let store = PropertyStore::new(config).unwrap();

    for object in 0..5u64 {
        store
            .update_subject(
                1,
                &SemanticData::new().with_row("wikipage_refs", Row::triple(1, 2, object)),
            )
            .unwrap();
    }

    let changelog = store.changelog();
    assert_eq!(changelog.len(), 2);
    assert!(changelog[1].diff.ids(Some(DiffSide::Insert)).contains(4));
}

#[test]
fn test_in_memory_store_writes_nothing() {
    let dir = tempdir().unwrap();
    let config = StorageConfig {
        changelog_path: dir.path().join("changelog.json"),
        audit_log_path: dir.path().join("audit.log"),
        ..StorageConfig::in_memory()
    };
    let store = PropertyStore::new(config).unwrap();
    store.update_subject(1706, &first_annotation()).unwrap();
    store.flush().unwrap();

    assert!(!dir.path().join("changelog.json").exists());
    assert!(!dir.path().join("audit.log").exists());
    assert_eq!(store.changelog().len(), 1);
}

#[test]
fn test_concurrent_updates_log_in_application_order() {
    let (store, dir) = test_store();

    std::thread::scope(|scope| {
        for worker in 0..4u64 {
            let store = &store;
            scope.spawn(move || {
                for step in 0..50u64 {
                    let data = SemanticData::new()
                        .with_row("wikipage_refs", Row::triple(1706, 1707, worker * 1000 + step));
                    store.update_subject(1706, &data).unwrap();
                }
            });
        }
    });

    let live = store.snapshot();
    assert_eq!(live.get("wikipage_refs").map(Vec::len), Some(1));

    let replayed = replay_audit_log(&dir.path().join("audit.log")).unwrap();
    assert_eq!(replayed, live);
}

#[test]
fn test_torn_tail_is_cut_on_reopen() {
    use std::io::Write;

    let dir = tempdir().unwrap();
    let log_path = dir.path().join("audit.log");
    {
        let store = PropertyStore::new(test_config(dir.path())).unwrap();
        store.update_subject(1706, &first_annotation()).unwrap();
    }
    let intact_len = std::fs::metadata(&log_path).unwrap().len();

    let mut file = std::fs::OpenOptions::new().append(true).open(&log_path).unwrap();
    file.write_all(&200u32.to_le_bytes()).unwrap();
    file.write_all(&[0xa1, 0x00]).unwrap();
    drop(file);

    {
        let store = PropertyStore::new(test_config(dir.path())).unwrap();
        assert_eq!(store.rows("wikipage_refs"), vec![Row::triple(1706, 1707, 388)]);
        assert_eq!(std::fs::metadata(&log_path).unwrap().len(), intact_len);
        store.update_subject(1706, &second_annotation()).unwrap();
    }

    let reopened = PropertyStore::new(test_config(dir.path())).unwrap();
    assert_eq!(reopened.rows("wikipage_refs"), vec![Row::triple(1706, 1707, 296)]);
    assert_eq!(AuditLog::open(&log_path).unwrap().read_all().unwrap().len(), 2);
}

#[test]
fn test_partial_length_prefix_is_cut() {
    use std::io::Write;

    let dir = tempdir().unwrap();
    let log_path = dir.path().join("audit.log");
    {
        let store = PropertyStore::new(test_config(dir.path())).unwrap();
        store.update_subject(1706, &first_annotation()).unwrap();
    }

    let mut file = std::fs::OpenOptions::new().append(true).open(&log_path).unwrap();
    file.write_all(&[0x10, 0x00]).unwrap();
    drop(file);

    let replayed = replay_audit_log(&log_path).unwrap();
    assert_eq!(replayed.get("wikipage_refs").map(Vec::len), Some(1));
}

#[test]
fn test_audit_log_truncate_clears_entries() {
    let (store, dir) = test_store();
    store.update_subject(1706, &first_annotation()).unwrap();

    let log_path = dir.path().join("audit.log");
    let log = AuditLog::open(&log_path).unwrap();
    assert_eq!(log.path(), log_path.as_path());
    assert_eq!(log.read_all().unwrap().len(), 1);

    log.truncate().unwrap();
    assert!(log.read_all().unwrap().is_empty());
    assert!(replay_audit_log(&log_path).unwrap().is_empty());
}
