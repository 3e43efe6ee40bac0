//! End-to-end heap behavior over a fully in-memory stack.

use std::sync::Arc;

use fheap_am::HeapManager;
use fheap_buffer::BufferManager;
use fheap_clog::ClogManager;
use fheap_disk::DiskManager;
use fheap_fsm::FsmManager;
use fheap_mvcc::{
    IsolationLevel, SnapshotManager, TransactionManager, TupleModifyResult,
};
use fheap_page::tuple::Tuple;
use fheap_page::{page, InfoMask};
use fheap_types::{ForkNumber, RelationId, TransactionId};

const REL: RelationId = RelationId::new(1);

struct Harness {
    pool: Arc<BufferManager>,
    txn: Arc<TransactionManager>,
    heap: HeapManager,
}

fn harness() -> Harness {
    let disk = Arc::new(DiskManager::in_memory());
    let pool = Arc::new(BufferManager::new(disk, 32));
    let fsm = Arc::new(FsmManager::new(Arc::clone(&pool)));
    let clog = Arc::new(ClogManager::in_memory());
    let snapshots = Arc::new(SnapshotManager::new(Arc::clone(&clog)));
    let txn = Arc::new(TransactionManager::new(snapshots, clog));
    let heap = HeapManager::new(Arc::clone(&pool), fsm, Arc::clone(&txn));
    Harness { pool, txn, heap }
}

#[test]
fn insert_then_scan_sees_own_tuple() {
    let h = harness();
    let mut tx = h.txn.begin(IsolationLevel::default());
    h.heap.insert(REL, &[1, 2, 3], &mut tx).unwrap();

    let rows = h.heap.scan(REL, &mut tx).unwrap();
    assert_eq!(rows.len(), 1);
    let tuple = &rows[0].tuple;
    assert_eq!(tuple.xmin(), tx.id());
    assert_eq!(tuple.xmax(), TransactionId::INVALID);
    assert_eq!(tuple.payload(), &[1, 2, 3]);
}

#[test]
fn uncommitted_insert_is_invisible_to_others() {
    let h = harness();
    let mut writer = h.txn.begin(IsolationLevel::default());
    h.heap.insert(REL, b"hidden", &mut writer).unwrap();

    let mut reader = h.txn.begin(IsolationLevel::default());
    assert!(h.heap.scan(REL, &mut reader).unwrap().is_empty());

    h.txn.commit(&mut writer).unwrap();
    // Read committed: the next statement takes a fresh snapshot.
    let rows = h.heap.scan(REL, &mut reader).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].tuple.payload(), b"hidden");
}

#[test]
fn repeatable_read_does_not_see_later_commits() {
    let h = harness();
    let mut reader = h.txn.begin(IsolationLevel::RepeatableRead);
    // Fix the snapshot before the writer commits.
    assert!(h.heap.scan(REL, &mut reader).unwrap().is_empty());

    let mut writer = h.txn.begin(IsolationLevel::default());
    h.heap.insert(REL, b"later", &mut writer).unwrap();
    h.txn.commit(&mut writer).unwrap();

    assert!(h.heap.scan(REL, &mut reader).unwrap().is_empty());
}

#[test]
fn update_links_a_version_chain() {
    let h = harness();
    let mut first = h.txn.begin(IsolationLevel::default());
    let old_tid = h.heap.insert(REL, &[7, 7, 7], &mut first).unwrap();
    h.txn.commit(&mut first).unwrap();

    let mut second = h.txn.begin(IsolationLevel::default());
    let outcome = h.heap.update(REL, old_tid, &[9], &mut second).unwrap();
    assert_eq!(outcome.result, TupleModifyResult::Ok);
    let new_tid = outcome.new_tid.unwrap();
    assert_ne!(new_tid, old_tid);

    // Inspect the raw page: the old version carries xmax and points
    // forward at the new one.
    let pinned = h
        .pool
        .read_buffer(REL, ForkNumber::Main, Some(old_tid.page()))
        .unwrap();
    let bytes = pinned.read();
    let old = Tuple::new(page::item(&bytes[..], old_tid.slot()).unwrap()).unwrap();
    assert_eq!(old.xmax(), second.id());
    assert_eq!(old.ctid(), new_tid);

    let new = Tuple::new(page::item(&bytes[..], new_tid.slot()).unwrap()).unwrap();
    assert_eq!(new.xmin(), second.id());
    assert_eq!(new.xmax(), TransactionId::INVALID);
    assert_eq!(new.payload(), &[9]);
    assert_eq!(new.ctid(), new_tid);
}

#[test]
fn updater_sees_new_version_others_see_old() {
    let h = harness();
    let mut first = h.txn.begin(IsolationLevel::default());
    let tid = h.heap.insert(REL, b"v1", &mut first).unwrap();
    h.txn.commit(&mut first).unwrap();

    let mut updater = h.txn.begin(IsolationLevel::default());
    h.heap.update(REL, tid, b"v2", &mut updater).unwrap();

    let rows = h.heap.scan(REL, &mut updater).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].tuple.payload(), b"v2");

    let mut other = h.txn.begin(IsolationLevel::default());
    let rows = h.heap.scan(REL, &mut other).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].tuple.payload(), b"v1");

    h.txn.commit(&mut updater).unwrap();
    let rows = h.heap.scan(REL, &mut other).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].tuple.payload(), b"v2");
}

#[test]
fn tuple_with_invalid_xmin_hint_rejects_update() {
    let h = harness();
    let mut tx = h.txn.begin(IsolationLevel::default());
    let tid = h.heap.insert(REL, &[5, 5], &mut tx).unwrap();
    h.txn.commit(&mut tx).unwrap();

    // Poison the hint directly on the page.
    {
        let pinned = h
            .pool
            .read_buffer(REL, ForkNumber::Main, Some(tid.page()))
            .unwrap();
        let mut bytes = pinned.write();
        Tuple::new(page::item_mut(&mut bytes[..], tid.slot()).unwrap())
            .unwrap()
            .set_hint(InfoMask::XMIN_INVALID);
        pinned.mark_dirty();
    }

    let before = {
        let pinned = h
            .pool
            .read_buffer(REL, ForkNumber::Main, Some(tid.page()))
            .unwrap();
        let bytes = pinned.read();
        page::item(&bytes[..], tid.slot()).unwrap().to_vec()
    };

    let mut tx2 = h.txn.begin(IsolationLevel::default());
    let outcome = h.heap.update(REL, tid, &[6], &mut tx2).unwrap();
    assert_eq!(outcome.result, TupleModifyResult::Invisible);
    assert_eq!(outcome.new_tid, None);

    // The tuple bytes did not move.
    let pinned = h
        .pool
        .read_buffer(REL, ForkNumber::Main, Some(tid.page()))
        .unwrap();
    let bytes = pinned.read();
    assert_eq!(page::item(&bytes[..], tid.slot()).unwrap(), &before[..]);
}

#[test]
fn delete_hides_tuple_after_commit() {
    let h = harness();
    let mut writer = h.txn.begin(IsolationLevel::default());
    let tid = h.heap.insert(REL, b"doomed", &mut writer).unwrap();
    h.txn.commit(&mut writer).unwrap();

    let mut deleter = h.txn.begin(IsolationLevel::default());
    assert_eq!(
        h.heap.delete(REL, tid, &mut deleter).unwrap(),
        TupleModifyResult::Ok
    );
    // The deleter itself no longer sees it.
    assert!(h.heap.scan(REL, &mut deleter).unwrap().is_empty());

    // A concurrent reader still does.
    let mut reader = h.txn.begin(IsolationLevel::default());
    assert_eq!(h.heap.scan(REL, &mut reader).unwrap().len(), 1);

    h.txn.commit(&mut deleter).unwrap();
    assert!(h.heap.scan(REL, &mut reader).unwrap().is_empty());
}

#[test]
fn aborted_delete_leaves_tuple_visible() {
    let h = harness();
    let mut writer = h.txn.begin(IsolationLevel::default());
    let tid = h.heap.insert(REL, b"survivor", &mut writer).unwrap();
    h.txn.commit(&mut writer).unwrap();

    let mut deleter = h.txn.begin(IsolationLevel::default());
    h.heap.delete(REL, tid, &mut deleter).unwrap();
    h.txn.abort(&mut deleter).unwrap();

    let mut reader = h.txn.begin(IsolationLevel::default());
    let rows = h.heap.scan(REL, &mut reader).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].tuple.payload(), b"survivor");
}

#[test]
fn concurrent_delete_reports_being_modified() {
    let h = harness();
    let mut writer = h.txn.begin(IsolationLevel::default());
    let tid = h.heap.insert(REL, b"contested", &mut writer).unwrap();
    h.txn.commit(&mut writer).unwrap();

    let mut first = h.txn.begin(IsolationLevel::default());
    let mut second = h.txn.begin(IsolationLevel::default());
    assert_eq!(
        h.heap.delete(REL, tid, &mut first).unwrap(),
        TupleModifyResult::Ok
    );
    assert_eq!(
        h.heap.delete(REL, tid, &mut second).unwrap(),
        TupleModifyResult::BeingModified
    );

    // Once the first deleter commits, the verdict becomes "updated".
    h.txn.commit(&mut first).unwrap();
    assert_eq!(
        h.heap.delete(REL, tid, &mut second).unwrap(),
        TupleModifyResult::Updated
    );
}

#[test]
fn oversized_payload_is_rejected() {
    let h = harness();
    let mut tx = h.txn.begin(IsolationLevel::default());
    let payload = vec![0u8; fheap_types::PAGE_SIZE];
    let err = h.heap.insert(REL, &payload, &mut tx).unwrap_err();
    assert!(matches!(
        err,
        fheap_error::FerroError::PayloadTooLarge { .. }
    ));
}

#[test]
fn delete_of_missing_tuple_is_not_found() {
    let h = harness();
    let mut tx = h.txn.begin(IsolationLevel::default());
    h.heap.insert(REL, b"x", &mut tx).unwrap();

    let bogus = fheap_types::Tid::new(
        fheap_types::PageId::FIRST,
        fheap_types::SlotIndex::new(40),
    );
    let err = h.heap.delete(REL, bogus, &mut tx).unwrap_err();
    assert!(matches!(
        err,
        fheap_error::FerroError::TupleNotFound { .. }
    ));
}

#[test]
fn inserts_spill_across_pages() {
    let h = harness();
    let mut tx = h.txn.begin(IsolationLevel::default());
    // Each tuple takes ~2 KiB; a few dozen cannot fit in one page.
    let payload = vec![0x3Cu8; 2000];
    let mut tids = Vec::new();
    for _ in 0..30 {
        tids.push(h.heap.insert(REL, &payload, &mut tx).unwrap());
    }
    let pages: std::collections::HashSet<_> = tids.iter().map(|t| t.page()).collect();
    assert!(pages.len() > 1, "30 fat tuples must span pages");

    h.txn.commit(&mut tx).unwrap();
    let mut reader = h.txn.begin(IsolationLevel::default());
    let rows = h.heap.scan(REL, &mut reader).unwrap();
    assert_eq!(rows.len(), 30);
    assert!(rows.iter().all(|r| r.tuple.payload() == &payload[..]));
}

#[test]
fn update_moves_to_another_page_when_full() {
    let h = harness();
    let mut tx = h.txn.begin(IsolationLevel::default());
    // Fill page 0 nearly to the brim.
    let big = vec![1u8; 4000];
    let first = h.heap.insert(REL, &big, &mut tx).unwrap();
    h.heap.insert(REL, &big, &mut tx).unwrap();
    h.txn.commit(&mut tx).unwrap();

    // Updating with an equally big payload cannot fit on page 0.
    let mut tx2 = h.txn.begin(IsolationLevel::default());
    let outcome = h.heap.update(REL, first, &big, &mut tx2).unwrap();
    assert_eq!(outcome.result, TupleModifyResult::Ok);
    let new_tid = outcome.new_tid.unwrap();
    assert_ne!(new_tid.page(), first.page());

    h.txn.commit(&mut tx2).unwrap();
    let mut reader = h.txn.begin(IsolationLevel::default());
    assert_eq!(h.heap.scan(REL, &mut reader).unwrap().len(), 2);
}
