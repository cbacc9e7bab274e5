use std::sync::atomic::{AtomicU64, Ordering};

use crate::data_store::versioned_record::{MIN_TID, Tid};
use crate::transaction::{LocalTransaction, TxnFlags};

/// Hands out transactions and commit timestamps.
///
/// Transaction ids and commit timestamps come from two independent, globally
/// increasing counters.
pub struct TxnManager {
    /// A globally increasing counter for generating unique transaction IDs.
    transaction_counter: AtomicU64,
    /// The last commit timestamp handed out.
    tid_counter: AtomicU64,
}

impl Default for TxnManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TxnManager {
    pub fn new() -> Self {
        Self {
            transaction_counter: AtomicU64::new(0),
            tid_counter: AtomicU64::new(MIN_TID),
        }
    }

    /// Starts a transaction that reads the latest committed versions.
    pub fn begin(&self, flags: TxnFlags) -> LocalTransaction {
        let transaction_id = self.transaction_counter.fetch_add(1, Ordering::SeqCst);
        LocalTransaction::new(transaction_id, flags, None)
    }

    /// Starts a read-only transaction pinned to the latest commit timestamp
    /// handed out so far.
    pub fn begin_snapshot(&self) -> LocalTransaction {
        let transaction_id = self.transaction_counter.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.last_tid();
        LocalTransaction::new(transaction_id, TxnFlags::READ_ONLY, Some(snapshot))
    }

    /// Allocates the next commit timestamp.
    pub fn next_tid(&self) -> Tid {
        self.tid_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn last_tid(&self) -> Tid {
        self.tid_counter.load(Ordering::SeqCst)
    }
}
