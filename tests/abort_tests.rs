mod common;

use common::{BoundedVisibilityTxn, key, load, setup_index};
use occindex::{AbortReason, OccIndexError, Transaction, TxnFlags, TxnState};

#[test]
fn test_changed_record_aborts_with_read_node_interference() {
    let (manager, index) = setup_index(4);
    load(&manager, &index, &[("k", "v1")]);

    let mut txn = manager.begin(TxnFlags::NONE);
    assert_eq!(index.search(&mut txn, b"k").unwrap(), Some(key("v1")));

    // A concurrent commit installs a newer version.
    load(&manager, &index, &[("k", "v2")]);

    let err = index.search(&mut txn, b"k").unwrap_err();
    assert_eq!(err, OccIndexError::Aborted(AbortReason::ReadNodeInterference));
    assert_eq!(txn.state(), TxnState::Aborted);
}

#[test]
fn test_scan_after_changed_record_aborts() {
    let (manager, index) = setup_index(4);
    load(&manager, &index, &[("a", "1"), ("b", "1")]);

    let mut txn = manager.begin(TxnFlags::NONE);
    index.search(&mut txn, b"b").unwrap();
    load(&manager, &index, &[("b", "2")]);

    // "b" is already in the read set, so the scan does not read it again.
    let pairs = index.scan_collect(&mut txn, b"", None, None).unwrap();
    assert_eq!(pairs, vec![(key("a"), key("1"))]);
    assert!(index.search(&mut txn, b"b").is_err());
    assert_eq!(txn.abort_reason(), Some(AbortReason::ReadNodeInterference));
}

#[test]
fn test_locked_record_aborts_with_unstable_read() {
    let (manager, index) = setup_index(4);
    let record = index.bulk_load("k", "v", manager.next_tid());

    let _writer = record.write_lock();
    let mut txn = manager.begin(TxnFlags::NONE);
    let err = index.search(&mut txn, b"k").unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::UnstableRead));
    assert!(txn.context(index.id()).unwrap().read_set().is_empty());

    let mut scanner = manager.begin(TxnFlags::NONE);
    let err = index.scan_collect(&mut scanner, b"", None, None).unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::UnstableRead));
}

#[test]
fn test_invisible_version_aborts_with_future_tid_read() {
    let (manager, index) = setup_index(4);
    load(&manager, &index, &[("old", "1")]);
    let started_at = manager.last_tid();
    load(&manager, &index, &[("new", "1")]);

    let mut txn = BoundedVisibilityTxn {
        inner: manager.begin(TxnFlags::NONE),
        visible_up_to: started_at,
    };
    assert_eq!(index.search(&mut txn, b"old").unwrap(), Some(key("1")));
    let err = index.search(&mut txn, b"new").unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::FutureTidRead));
    assert_eq!(txn.inner.abort_reason(), Some(AbortReason::FutureTidRead));
}

#[test]
fn test_invisible_version_aborts_scan() {
    let (manager, index) = setup_index(4);
    load(&manager, &index, &[("a", "1")]);
    let started_at = manager.last_tid();
    load(&manager, &index, &[("b", "1")]);

    let mut txn = BoundedVisibilityTxn {
        inner: manager.begin(TxnFlags::NONE),
        visible_up_to: started_at,
    };
    let mut seen = Vec::new();
    let mut visitor = |k: &[u8], _: &[u8]| {
        seen.push(k.to_vec());
        true
    };
    let err = index.search_range(&mut txn, b"", None, &mut visitor).unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::FutureTidRead));
    assert_eq!(seen, vec![key("a")]);
}

#[test]
fn test_node_change_aborts_low_level_scan() {
    let (manager, index) = setup_index(16);
    load(&manager, &index, &[("a", "1"), ("c", "1")]);

    let mut txn = manager.begin(TxnFlags::LOW_LEVEL_SCAN);
    assert_eq!(index.scan_collect(&mut txn, b"", None, None).unwrap().len(), 2);

    let mut writer = manager.begin(TxnFlags::NONE);
    index.insert(&mut writer, "b", "1").unwrap();

    let err = index.scan_collect(&mut txn, b"", None, None).unwrap_err();
    assert_eq!(err, OccIndexError::Aborted(AbortReason::NodeScanReadVersionChanged));
}

#[test]
fn test_node_change_ignored_by_key_range_scan() {
    let (manager, index) = setup_index(16);
    load(&manager, &index, &[("a", "1"), ("c", "1")]);

    let mut txn = manager.begin(TxnFlags::NONE);
    index.scan_collect(&mut txn, b"", None, None).unwrap();

    let mut writer = manager.begin(TxnFlags::NONE);
    index.insert(&mut writer, "b", "1").unwrap();

    // The new key falls into a recorded absent range; that is left to
    // commit-time validation.
    index.scan_collect(&mut txn, b"", None, None).unwrap();
    assert!(txn.ensure_active().is_ok());
}

#[test]
#[should_panic(expected = "key recorded absent twice in one transaction")]
fn test_duplicate_absent_entry_is_fatal() {
    let (manager, index) = setup_index(4);
    let mut txn = manager.begin(TxnFlags::NONE);
    index.search(&mut txn, b"x").unwrap();
    txn.context_for(index.id()).mark_absent(key("x"));
}

#[test]
fn test_aborted_transaction_rejects_further_operations() {
    let (manager, index) = setup_index(4);
    let mut txn = manager.begin(TxnFlags::READ_ONLY);
    assert!(index.put(&mut txn, "a", "1").is_err());

    assert_eq!(
        index.search(&mut txn, b"a"),
        Err(OccIndexError::NotActive(TxnState::Aborted))
    );
    assert_eq!(
        index.scan_collect(&mut txn, b"", None, None).unwrap_err(),
        OccIndexError::NotActive(TxnState::Aborted)
    );
    // The first abort reason is kept.
    assert_eq!(txn.abort_reason(), Some(AbortReason::User));
}
