//! The transactional index.
//!
//! [`TxnIndex`] routes every access of a transaction to the shared
//! [`OrderedIndex`] through the transaction's [`TxnContext`]: local writes
//! and known-absent keys are served first, reads of shared records go through
//! a stabilizing read and are checked against what the transaction saw
//! before, and anything inconsistent aborts the transaction on the spot.
//!
//! [`TxnContext`]: crate::context::TxnContext

/// Teardown of an index and the reclamation of its records.
pub mod purge;
/// Range scans and the adapter between index callbacks and transactions.
pub mod range_scan;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::config::IndexConfig;
use crate::data_store::ordered_index::OrderedIndex;
use crate::data_store::versioned_record::{MAX_TID, RecordRef, Tid, VersionedRecord};
use crate::errors::{AbortReason, Result};
use crate::stats::{IndexCounters, ReadSite};
use crate::transaction::Transaction;

static NEXT_INDEX_ID: AtomicU64 = AtomicU64::new(1);

/// Identity under which transactions keep their per-index context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexId(u64);

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "index#{}", self.0)
    }
}

/// Hooks of the component that owns an index.
pub trait IndexHandler: Send + Sync {
    /// Called when the index is purged, before any record is reclaimed.
    /// Must stop every background task that could still reach the index.
    fn on_destruct(&self);

    /// Whether background tasks may read records of this index concurrently
    /// with a purge.
    fn has_background_task(&self) -> bool;
}

/// Handler for indexes without background maintenance.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHandler;

impl IndexHandler for DefaultHandler {
    fn on_destruct(&self) {}

    fn has_background_task(&self) -> bool {
        false
    }
}

/// Transactional view of an [`OrderedIndex`].
///
/// Reads and writes go through a [`Transaction`], which collects what it
/// observed and what it intends to write in its [`TxnContext`] for this
/// index. The index itself only aborts; commit is decided elsewhere.
///
/// [`TxnContext`]: crate::context::TxnContext
pub struct TxnIndex {
    id: IndexId,
    config: IndexConfig,
    underlying: OrderedIndex,
    handler: Arc<dyn IndexHandler>,
    counters: IndexCounters,
    destructed: AtomicBool,
}

impl TxnIndex {
    /// Creates an empty index.
    ///
    /// # Errors
    ///
    /// Returns [`OccIndexError::Config`](crate::errors::OccIndexError::Config)
    /// if `config` does not validate.
    pub fn new(config: IndexConfig, handler: Arc<dyn IndexHandler>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            id: IndexId(NEXT_INDEX_ID.fetch_add(1, Ordering::Relaxed)),
            underlying: OrderedIndex::new(config.fanout),
            config,
            handler,
            counters: IndexCounters::default(),
            destructed: AtomicBool::new(false),
        })
    }

    /// Creates an empty index with the default configuration and no
    /// background tasks.
    pub fn with_name(name: impl Into<String>) -> Result<Self> {
        Self::new(IndexConfig::named(name), Arc::new(DefaultHandler))
    }

    pub fn id(&self) -> IndexId {
        self.id
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// The shared ordered index backing this transactional index.
    pub fn underlying(&self) -> &OrderedIndex {
        &self.underlying
    }

    pub fn counters(&self) -> &IndexCounters {
        &self.counters
    }

    pub fn is_destructed(&self) -> bool {
        self.destructed.load(Ordering::Acquire)
    }

    /// Point read of `key`. Returns `None` if the key is absent or deleted.
    pub fn search<T: Transaction>(&self, txn: &mut T, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.search_bounded(txn, key, usize::MAX)
    }

    /// Point read of `key`, returning at most `max_bytes` bytes of its value.
    ///
    /// The key is resolved from, in order: the transaction's own writes, keys
    /// and ranges the transaction already found absent, and finally the
    /// shared index.
    ///
    /// # Panics
    ///
    /// If `max_bytes` is zero.
    pub fn search_bounded<T: Transaction>(
        &self,
        txn: &mut T,
        key: &[u8],
        max_bytes: usize,
    ) -> Result<Option<Vec<u8>>> {
        assert!(max_bytes > 0, "max_bytes must be positive");
        txn.ensure_active()?;

        if let Some(mut value) = txn.context_for(self.id).local_search(key) {
            value.truncate(max_bytes);
            return Ok(found(value));
        }

        let Some(record) = self.underlying.search(key) else {
            // every key exists at MIN_TID with no value
            txn.context_for(self.id).mark_absent(key.to_vec());
            return Ok(None);
        };
        let value = self.read_record(txn, &record, Some(max_bytes), ReadSite::Search)?;
        Ok(found(value))
    }

    /// Reads `record` at the transaction's snapshot and records the observed
    /// timestamp in the read set.
    pub(crate) fn read_record<T: Transaction>(
        &self,
        txn: &mut T,
        record: &RecordRef,
        max_bytes: Option<usize>,
        site: ReadSite,
    ) -> Result<Vec<u8>> {
        let snapshot_tid: Tid = txn.consistent_snapshot_tid().unwrap_or(MAX_TID);
        let read_only = txn.flags().is_read_only();

        record.prefetch();
        let Some(observed) = record.stable_read(snapshot_tid, read_only, max_bytes) else {
            return Err(txn.abort(AbortReason::UnstableRead));
        };
        if !txn.can_read_tid(observed.tid) {
            return Err(txn.abort(AbortReason::FutureTidRead));
        }
        if observed.value.is_empty() {
            self.counters.record_logical_delete(site);
        }
        if !txn
            .context_for(self.id)
            .observe_read(record.id(), observed.tid)
        {
            return Err(txn.abort(AbortReason::ReadNodeInterference));
        }
        Ok(observed.value)
    }

    /// Writes `value` under `key`, which may or may not exist yet.
    pub fn put<T: Transaction>(
        &self,
        txn: &mut T,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Result<()> {
        self.do_tree_put(txn, key.into(), value.into(), false)
    }

    /// Writes `value` under `key`, which must not exist in the index yet.
    /// Aborts with [`AbortReason::WriteNodeInterference`] if it does.
    pub fn insert<T: Transaction>(
        &self,
        txn: &mut T,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Result<()> {
        self.do_tree_put(txn, key.into(), value.into(), true)
    }

    /// Deletes `key` by writing an empty value.
    pub fn remove<T: Transaction>(&self, txn: &mut T, key: impl Into<Vec<u8>>) -> Result<()> {
        self.do_tree_put(txn, key.into(), Vec::new(), false)
    }

    fn do_tree_put<T: Transaction>(
        &self,
        txn: &mut T,
        key: Vec<u8>,
        value: Vec<u8>,
        expect_new: bool,
    ) -> Result<()> {
        txn.ensure_active()?;
        if txn.flags().is_read_only() {
            return Err(txn.abort(AbortReason::User));
        }

        let mut inserted = None;
        if expect_new {
            let record: RecordRef = Arc::new(VersionedRecord::new());
            let (_, collided) = self.underlying.insert_if_absent(key.clone(), record.clone());
            if collided {
                return Err(txn.abort(AbortReason::WriteNodeInterference));
            }
            inserted = Some(record);
        }
        txn.context_for(self.id).install_write(key, value, inserted);
        Ok(())
    }

    /// Loads a committed value outside of any transaction, e.g. while
    /// populating an index at startup. Installs a new version if the key
    /// already has a record.
    pub fn bulk_load(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, tid: Tid) -> RecordRef {
        let value = value.into();
        let (record, collided) = self
            .underlying
            .insert_if_absent(key.into(), Arc::new(VersionedRecord::new()));
        if collided {
            log::trace!("bulk load installs tid {} on existing {}", tid, record.id());
        }
        record.install(tid, value);
        record
    }
}

fn found(value: Vec<u8>) -> Option<Vec<u8>> {
    if value.is_empty() { None } else { Some(value) }
}
