use rangelock_core::{bytewise_comparator, DictionaryId, KeyRange, TxnId};
use rangelock_locktree::LockRequest;
use rangelock_manager::{EscalationMode, LockManager, LockManagerOptions, LockManagerStatus};
use std::collections::BTreeMap;
use std::time::Duration;

fn manager() -> LockManager {
    LockManager::new(
        LockManagerOptions::default()
            .with_max_lock_memory(1 << 20)
            .with_escalation(EscalationMode::Inline),
    )
}

fn add_pending(handle: &rangelock_manager::LocktreeHandle, count: u64) {
    for txn in 0..count {
        handle.request_info().add_pending(LockRequest::new(
            TxnId::new(100 + txn),
            KeyRange::point(format!("key-{txn}").into_bytes()),
            Some(TxnId::new(1)),
        ));
    }
}

#[test]
fn pending_requests_of_every_locktree_are_visited() {
    let manager = manager();
    let first = manager
        .get(DictionaryId::new(1), None, bytewise_comparator(), None)
        .unwrap();
    let second = manager
        .get(DictionaryId::new(2), None, bytewise_comparator(), None)
        .unwrap();
    add_pending(&first, 3);
    add_pending(&second, 5);

    let mut per_dict: BTreeMap<DictionaryId, usize> = BTreeMap::new();
    let mut calls = 0;
    manager
        .iterate_pending_lock_requests(|request| {
            calls += 1;
            *per_dict.entry(request.dict_id).or_default() += 1;
            assert_eq!(request.conflicting_txn, Some(TxnId::new(1)));
            assert!(request.range.left().starts_with(b"key-"));
            Ok::<(), ()>(())
        })
        .unwrap();

    assert_eq!(calls, 8);
    assert_eq!(per_dict.get(&DictionaryId::new(1)), Some(&3));
    assert_eq!(per_dict.get(&DictionaryId::new(2)), Some(&5));
    assert_eq!(manager.status().pending_lock_requests, 8);
}

#[test]
fn iteration_stops_at_the_first_error() {
    let manager = manager();
    let handle = manager
        .get(DictionaryId::new(1), None, bytewise_comparator(), None)
        .unwrap();
    add_pending(&handle, 4);

    let mut calls = 0;
    let result = manager.iterate_pending_lock_requests(|request| {
        calls += 1;
        if calls == 2 {
            return Err(request.txn);
        }
        Ok(())
    });

    assert_eq!(result, Err(TxnId::new(101)));
    assert_eq!(calls, 2);
}

#[test]
fn status_keeps_counters_of_destroyed_locktrees() {
    let manager = manager();

    let doomed = manager
        .get(DictionaryId::new(1), None, bytewise_comparator(), None)
        .unwrap();
    doomed.request_info().record_wait(Duration::from_millis(3));
    doomed.request_info().record_wait(Duration::from_secs(2));
    doomed.request_info().record_timeout();
    manager.release(doomed);

    let live = manager
        .get(DictionaryId::new(2), None, bytewise_comparator(), None)
        .unwrap();
    live.request_info().record_wait(Duration::from_millis(5));
    live.try_acquire(TxnId::new(1), KeyRange::point(b"a".to_vec()))
        .unwrap();

    let status = manager.status();
    assert_eq!(status.num_locktrees, 1);
    assert_eq!(status.wait_count, 3);
    assert_eq!(status.long_wait_count, 1);
    assert_eq!(status.long_wait_time_us, 2_000_000);
    assert_eq!(status.wait_time_us, 2_008_000);
    assert_eq!(status.timeout_count, 1);
    assert_eq!(status.current_lock_memory, manager.current_lock_memory());
    assert_eq!(status.max_lock_memory, 1 << 20);

    // Reading the status twice does not count anything twice.
    assert_eq!(manager.status(), status);
}

#[test]
fn status_serializes_with_flat_field_names() {
    let manager = manager();
    manager.run_escalation();

    let status = manager.status();
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["escalation_count"], 1);
    assert_eq!(json["max_lock_memory"], 1 << 20);
    assert_eq!(json["wait_escalation_count"], 1);

    let back: LockManagerStatus = serde_json::from_value(json).unwrap();
    assert_eq!(back, status);
}
