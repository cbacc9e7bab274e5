//! Common utilities for occindex integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use occindex::context::TxnContext;
use occindex::errors::{AbortReason, OccIndexError, Result};
use occindex::{
    IndexConfig, IndexHandler, IndexId, KeyRange, LocalTransaction, Tid, Transaction, TxnFlags,
    TxnIndex, TxnManager,
};

/// Creates a manager and an index whose leaves split after `fanout` keys.
pub fn setup_index(fanout: usize) -> (TxnManager, TxnIndex) {
    let config = IndexConfig::named("test").with_fanout(fanout);
    let index = TxnIndex::new(config, Arc::new(occindex::DefaultHandler)).unwrap();
    (TxnManager::new(), index)
}

/// Commits `pairs` outside of any transaction, each at a fresh timestamp.
pub fn load(manager: &TxnManager, index: &TxnIndex, pairs: &[(&str, &str)]) {
    for (key, value) in pairs {
        index.bulk_load(*key, *value, manager.next_tid());
    }
}

pub fn key(s: &str) -> Vec<u8> {
    s.as_bytes().to_vec()
}

/// Returns the absent ranges `txn` recorded on `index`, in key order.
pub fn absent_ranges(txn: &LocalTransaction, index: &TxnIndex) -> Vec<KeyRange> {
    txn.context(index.id())
        .map(|ctx| ctx.absent_ranges().iter().collect())
        .unwrap_or_default()
}

/// Handler that counts teardown notifications.
#[derive(Debug, Default)]
pub struct CountingHandler {
    pub destructs: AtomicUsize,
    pub background: bool,
}

impl CountingHandler {
    pub fn with_background_task() -> Self {
        Self {
            destructs: AtomicUsize::new(0),
            background: true,
        }
    }

    pub fn destructs(&self) -> usize {
        self.destructs.load(Ordering::SeqCst)
    }
}

impl IndexHandler for CountingHandler {
    fn on_destruct(&self) {
        self.destructs.fetch_add(1, Ordering::SeqCst);
    }

    fn has_background_task(&self) -> bool {
        self.background
    }
}

/// A transaction that reads the latest versions but may only see versions
/// committed no later than `visible_up_to`.
///
/// Models isolation rules stricter than snapshot reads, under which a read
/// can land on a version the transaction is not allowed to see.
pub struct BoundedVisibilityTxn {
    pub inner: LocalTransaction,
    pub visible_up_to: Tid,
}

impl Transaction for BoundedVisibilityTxn {
    fn ensure_active(&self) -> Result<()> {
        self.inner.ensure_active()
    }

    fn context_for(&mut self, index: IndexId) -> &mut TxnContext {
        self.inner.context_for(index)
    }

    fn consistent_snapshot_tid(&self) -> Option<Tid> {
        None
    }

    fn can_read_tid(&self, tid: Tid) -> bool {
        tid <= self.visible_up_to
    }

    fn flags(&self) -> TxnFlags {
        self.inner.flags()
    }

    fn abort(&mut self, reason: AbortReason) -> OccIndexError {
        self.inner.abort(reason)
    }
}
