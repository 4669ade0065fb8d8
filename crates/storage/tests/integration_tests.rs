//! Integration tests for round persistence (Sled and in-memory) and the
//! label log's crash recovery.

use poet_storage::{
    member_key, LabelStore, MemoryRoundStore, RoundPhase, RoundRecord, RoundStore,
    SledRoundStore, StorageError, RECORD_SIZE,
};
use poet_types::{Label, RoundId};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use tempfile::TempDir;

/// Helper to build a distinct label
fn label(i: u64) -> Label {
    let mut l = [0u8; 32];
    l[24..].copy_from_slice(&i.to_be_bytes());
    l
}

fn exercise_round_store(store: &dyn RoundStore) {
    let first = store.next_round_id().unwrap();
    let second = store.next_round_id().unwrap();
    assert!(second > first);

    store.put_round(&RoundRecord::new(second, 2_000, 30_000)).unwrap();
    store.put_round(&RoundRecord::new(first, 1_000, 30_000)).unwrap();

    let listed: Vec<RoundId> = store.list_rounds().unwrap().iter().map(|r| r.id).collect();
    assert_eq!(listed, vec![first, second]);

    for member in [b"carol".as_slice(), b"alice", b"bob", b"alice"] {
        store.append_member(first, member).unwrap();
    }
    let members = store.members(first).unwrap();
    assert_eq!(members.len(), 3);
    let keys: Vec<[u8; 32]> = members.iter().map(|m| member_key(m)).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted, "members are returned in key order");
    assert!(store.members(second).unwrap().is_empty());

    let mut record = store.get_round(first).unwrap().unwrap();
    record.statement = Some(label(7));
    store.put_round(&record).unwrap();
    assert_eq!(
        store.get_round(first).unwrap().unwrap().phase(),
        RoundPhase::Executing
    );

    store.put_proof(first, b"encoded proof").unwrap();
    let finished = store.get_round(first).unwrap().unwrap();
    assert_eq!(finished.phase(), RoundPhase::Finished);
    assert_eq!(finished.statement, Some(label(7)));
    assert_eq!(
        store.get_proof(first).unwrap().as_deref(),
        Some(b"encoded proof".as_slice())
    );

    assert!(matches!(
        store.put_proof(RoundId(999), b"x"),
        Err(StorageError::RoundNotFound(RoundId(999)))
    ));

    store.remove_round(first).unwrap();
    assert!(store.get_round(first).unwrap().is_none());
    assert!(store.get_proof(first).unwrap().is_none());
    assert!(store.members(first).unwrap().is_empty());
    assert!(store.get_round(second).unwrap().is_some());
}

#[test]
fn memory_round_store() {
    exercise_round_store(&MemoryRoundStore::default());
}

#[test]
fn sled_round_store() {
    let dir = TempDir::new().unwrap();
    let store = SledRoundStore::open(dir.path().join("db")).unwrap();
    exercise_round_store(&store);
}

#[test]
fn sled_round_ids_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");

    let last = {
        let store = SledRoundStore::open(&path).unwrap();
        store.next_round_id().unwrap();
        let id = store.next_round_id().unwrap();
        store.put_round(&RoundRecord::new(id, 5, 10)).unwrap();
        store.append_member(id, b"member").unwrap();
        id
    };

    let store = SledRoundStore::open(&path).unwrap();
    assert!(store.next_round_id().unwrap() > last);
    assert_eq!(store.list_rounds().unwrap().len(), 1);
    assert_eq!(store.members(last).unwrap(), vec![b"member".to_vec()]);
}

#[test]
fn label_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("labels").join("round-0.labels");
    {
        let mut store = LabelStore::open(&path).unwrap();
        for i in 0..100 {
            store.append(&label(i)).unwrap();
        }
        store.sync().unwrap();
    }

    let store = LabelStore::open(&path).unwrap();
    assert_eq!(store.len(), 100);
    assert_eq!(store.read(42).unwrap(), label(42));
}

#[test]
fn torn_tail_is_truncated_on_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("round.labels");
    {
        let mut store = LabelStore::open(&path).unwrap();
        for i in 0..10 {
            store.append(&label(i)).unwrap();
        }
        store.sync().unwrap();
    }

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0xAB; RECORD_SIZE / 2]).unwrap();
    drop(file);

    let store = LabelStore::open(&path).unwrap();
    assert_eq!(store.len(), 10);
    assert_eq!(store.read(9).unwrap(), label(9));
}

#[test]
fn corrupted_record_truncates_to_last_valid_entry() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("round.labels");
    {
        let mut store = LabelStore::open(&path).unwrap();
        for i in 0..20 {
            store.append(&label(i)).unwrap();
        }
        store.sync().unwrap();
    }

    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(15 * RECORD_SIZE as u64)).unwrap();
    file.write_all(&[0xFF; 4]).unwrap();
    drop(file);

    let mut store = LabelStore::open(&path).unwrap();
    assert_eq!(store.len(), 15);
    assert_eq!(store.read(14).unwrap(), label(14));

    store.append(&label(15)).unwrap();
    store.sync().unwrap();
    assert_eq!(store.read(15).unwrap(), label(15));
}
