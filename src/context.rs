use ahash::AHashMap as HashMap;
use log::trace;

use crate::data_store::ordered_index::NodeId;
use crate::data_store::versioned_record::{RecordId, RecordRef, Tid};
use crate::key_range::{KeyRange, KeyRangeSet};

/// A pending write of one key.
#[derive(Debug, Clone)]
pub struct WriteRecord {
    /// The value to commit. Empty means the key is deleted.
    pub value: Vec<u8>,
    /// The record this transaction inserted into the index for the key, if
    /// the key was written with `expect_new`.
    pub record: Option<RecordRef>,
}

/// Why a key was recorded in the absent set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsentRecordType {
    /// A point read found no record for the key.
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsentRecord {
    pub kind: AbsentRecordType,
}

/// Per-(transaction, index) state.
///
/// Created lazily on the first access of a transaction to an index and
/// dropped with the transaction. Never shared between transactions.
#[derive(Debug, Default)]
pub struct TxnContext {
    write_set: HashMap<Vec<u8>, WriteRecord>,
    read_set: HashMap<RecordId, Tid>,
    absent_set: HashMap<Vec<u8>, AbsentRecord>,
    absent_ranges: KeyRangeSet,
    node_scan: HashMap<NodeId, u64>,
}

impl TxnContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `key` from transaction-local state, in priority order:
    /// the write set, the absent set, then the absent ranges.
    ///
    /// Returns `Some(value)` if the key is resolved locally, where an empty
    /// value means the key is known to be absent, and `None` if the caller
    /// has to consult the index.
    pub fn local_search(&self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(write) = self.write_set.get(key) {
            return Some(write.value.clone());
        }
        if self.absent_set.contains_key(key) {
            return Some(Vec::new());
        }
        if self.absent_ranges.contains(key) {
            return Some(Vec::new());
        }
        None
    }

    /// Installs a pending write, replacing any earlier write of the same key.
    ///
    /// A record inserted by an earlier `expect_new` write is kept when the
    /// later write does not insert one of its own.
    pub fn install_write(&mut self, key: Vec<u8>, value: Vec<u8>, record: Option<RecordRef>) {
        match self.write_set.get_mut(&key) {
            Some(existing) => {
                existing.value = value;
                if record.is_some() {
                    existing.record = record;
                }
            }
            None => {
                self.write_set.insert(key, WriteRecord { value, record });
            }
        }
    }

    /// Records that `key` was confirmed missing from the index.
    ///
    /// # Panics
    ///
    /// If `key` is already in the absent set. A key that was found absent is
    /// resolved by [`TxnContext::local_search`] from then on, so a second
    /// confirmation means the caller skipped the local lookup.
    pub fn mark_absent(&mut self, key: Vec<u8>) {
        assert!(
            !self.absent_set.contains_key(&key),
            "key recorded absent twice in one transaction"
        );
        self.absent_set.insert(
            key,
            AbsentRecord {
                kind: AbsentRecordType::Read,
            },
        );
    }

    /// Records a key interval that held no keys when it was scanned.
    /// Empty intervals are ignored; overlapping or touching ones are merged.
    pub fn add_absent_range(&mut self, range: KeyRange) {
        if range.is_empty_range() {
            return;
        }
        trace!("absent range {:?}", range);
        self.absent_ranges.insert(range);
    }

    pub fn read_tid(&self, record: RecordId) -> Option<Tid> {
        self.read_set.get(&record).copied()
    }

    pub fn has_read(&self, record: RecordId) -> bool {
        self.read_set.contains_key(&record)
    }

    /// Records the timestamp observed for `record`, or checks it against the
    /// first observation. Returns `false` if the two differ.
    pub fn observe_read(&mut self, record: RecordId, tid: Tid) -> bool {
        match self.read_set.get(&record) {
            Some(first) => *first == tid,
            None => {
                self.read_set.insert(record, tid);
                true
            }
        }
    }

    /// Records the version of a node visited by a low-level scan, or checks
    /// it against the first visit. Returns `false` if the two differ.
    pub fn observe_node(&mut self, node: NodeId, version: u64) -> bool {
        match self.node_scan.get(&node) {
            Some(first) => *first == version,
            None => {
                self.node_scan.insert(node, version);
                true
            }
        }
    }

    pub fn write_set(&self) -> &HashMap<Vec<u8>, WriteRecord> {
        &self.write_set
    }

    pub fn read_set(&self) -> &HashMap<RecordId, Tid> {
        &self.read_set
    }

    pub fn absent_set(&self) -> &HashMap<Vec<u8>, AbsentRecord> {
        &self.absent_set
    }

    pub fn absent_ranges(&self) -> &KeyRangeSet {
        &self.absent_ranges
    }

    pub fn node_scan(&self) -> &HashMap<NodeId, u64> {
        &self.node_scan
    }

    pub fn is_empty(&self) -> bool {
        self.write_set.is_empty()
            && self.read_set.is_empty()
            && self.absent_set.is_empty()
            && self.absent_ranges.is_empty()
            && self.node_scan.is_empty()
    }
}
