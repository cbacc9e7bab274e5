//! Optimistic transactional access to a concurrent ordered index.
//!
//! A [`TxnIndex`] wraps a shared [`OrderedIndex`] of versioned records.
//! Transactions read and write it through their own [`TxnContext`], which
//! collects the read set, the keys and key ranges found absent, and the
//! pending writes that a commit protocol validates later on. Inconsistent
//! observations abort the transaction immediately with an [`AbortReason`].
//!
//! [`OrderedIndex`]: data_store::ordered_index::OrderedIndex

pub mod config;
pub mod context;
pub mod data_store;
pub mod errors;
pub mod index;
pub mod key_range;
pub mod manager;
pub mod stats;
pub mod transaction;

// Re-export key types and structs for easier access
pub use config::{IndexConfig, ReclamationMode};
pub use context::TxnContext;
pub use data_store::versioned_record::{MAX_TID, MIN_TID, RecordId, Tid, VersionedRecord};
pub use errors::{AbortReason, OccIndexError, Result};
pub use index::purge::{EpochReclaimer, ImmediateReclaimer, Reclaimer};
pub use index::range_scan::ScanVisitor;
pub use index::{DefaultHandler, IndexHandler, IndexId, TxnIndex};
pub use key_range::{KeyRange, KeyRangeSet};
pub use manager::TxnManager;
pub use stats::{IndexCounters, PurgeStats};
pub use transaction::{LocalTransaction, Transaction, TxnFlags, TxnState};

/// Everything needed to run transactions against an index.
pub mod prelude {
    pub use crate::config::IndexConfig;
    pub use crate::data_store::versioned_record::{MAX_TID, MIN_TID, Tid, VersionedRecord};
    pub use crate::errors::{AbortReason, OccIndexError, Result};
    pub use crate::index::range_scan::ScanVisitor;
    pub use crate::index::{DefaultHandler, IndexHandler, TxnIndex};
    pub use crate::manager::TxnManager;
    pub use crate::transaction::{LocalTransaction, Transaction, TxnFlags};
}
