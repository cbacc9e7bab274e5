use std::ops::BitOr;

use ahash::AHashMap as HashMap;
use log::debug;

use crate::context::TxnContext;
use crate::data_store::versioned_record::Tid;
use crate::errors::{AbortReason, OccIndexError, Result};
use crate::index::IndexId;

/// Static traits of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TxnFlags(u32);

impl TxnFlags {
    pub const NONE: TxnFlags = TxnFlags(0);
    /// The transaction never writes. Writes abort with [`AbortReason::User`].
    pub const READ_ONLY: TxnFlags = TxnFlags(1);
    /// Range scans pin the versions of the index nodes they visit instead of
    /// recording absent key ranges.
    pub const LOW_LEVEL_SCAN: TxnFlags = TxnFlags(1 << 1);

    pub fn contains(self, other: TxnFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_read_only(self) -> bool {
        self.contains(TxnFlags::READ_ONLY)
    }

    pub fn is_low_level_scan(self) -> bool {
        self.contains(TxnFlags::LOW_LEVEL_SCAN)
    }
}

impl BitOr for TxnFlags {
    type Output = TxnFlags;

    fn bitor(self, rhs: TxnFlags) -> TxnFlags {
        TxnFlags(self.0 | rhs.0)
    }
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
}

/// What the transactional index needs from a transaction.
///
/// The index never decides commit outcomes. It only reads the transaction's
/// visibility rules, records reads and writes in the per-index
/// [`TxnContext`], and reports aborts through [`Transaction::abort`].
pub trait Transaction {
    /// Fails if the transaction is no longer live.
    fn ensure_active(&self) -> Result<()>;

    /// The transaction's context for `index`, created on first use.
    fn context_for(&mut self, index: IndexId) -> &mut TxnContext;

    /// The timestamp of a consistent snapshot to read at, if the transaction
    /// reads from one. Otherwise reads see the latest versions.
    fn consistent_snapshot_tid(&self) -> Option<Tid>;

    /// Whether a version committed at `tid` is visible to this transaction.
    fn can_read_tid(&self, tid: Tid) -> bool;

    fn flags(&self) -> TxnFlags;

    /// Marks the transaction aborted for `reason` and returns the error that
    /// unwinds the current operation.
    fn abort(&mut self, reason: AbortReason) -> OccIndexError;
}

/// A transaction executing on the local node.
///
/// Holds one [`TxnContext`] per index it touched. Validation and commit are
/// driven from outside; see [`LocalTransaction::mark_committed`].
#[derive(Debug)]
pub struct LocalTransaction {
    id: u64,
    state: TxnState,
    flags: TxnFlags,
    snapshot_tid: Option<Tid>,
    contexts: HashMap<IndexId, TxnContext>,
    abort_reason: Option<AbortReason>,
}

impl LocalTransaction {
    /// Creates a new transaction.
    ///
    /// This is typically called by [`TxnManager`](crate::manager::TxnManager)
    /// when a transaction is started.
    ///
    /// # Arguments
    ///
    /// * `id` - The unique identifier for the transaction.
    /// * `flags` - Read-only and scan-mode traits.
    /// * `snapshot_tid` - The snapshot to read at, `None` to read the latest versions.
    pub fn new(id: u64, flags: TxnFlags, snapshot_tid: Option<Tid>) -> Self {
        debug!("Transaction {} started (flags {:?}, snapshot {:?})", id, flags, snapshot_tid);
        Self {
            id,
            state: TxnState::Active,
            flags,
            snapshot_tid,
            contexts: HashMap::new(),
            abort_reason: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    /// The reason of the first abort, if the transaction was aborted by an
    /// index operation.
    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.abort_reason
    }

    /// The context for `index`, if the transaction has touched it.
    pub fn context(&self, index: IndexId) -> Option<&TxnContext> {
        self.contexts.get(&index)
    }

    /// Marks the transaction committed. Called by the commit protocol once
    /// it has validated the transaction's contexts.
    pub fn mark_committed(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.state = TxnState::Committed;
        debug!("Transaction {} committed", self.id);
        Ok(())
    }

    /// Aborts the transaction on the caller's behalf and discards its
    /// read and write sets.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.state = TxnState::Aborted;
        self.contexts.clear();
        debug!("Transaction {} rolled back", self.id);
        Ok(())
    }
}

impl Transaction for LocalTransaction {
    fn ensure_active(&self) -> Result<()> {
        match self.state {
            TxnState::Active => Ok(()),
            state => Err(OccIndexError::NotActive(state)),
        }
    }

    fn context_for(&mut self, index: IndexId) -> &mut TxnContext {
        self.contexts.entry(index).or_default()
    }

    fn consistent_snapshot_tid(&self) -> Option<Tid> {
        self.snapshot_tid
    }

    fn can_read_tid(&self, tid: Tid) -> bool {
        self.snapshot_tid.is_none_or(|snapshot| tid <= snapshot)
    }

    fn flags(&self) -> TxnFlags {
        self.flags
    }

    fn abort(&mut self, reason: AbortReason) -> OccIndexError {
        debug!("Transaction {} aborted: {}", self.id, reason);
        self.state = TxnState::Aborted;
        self.abort_reason.get_or_insert(reason);
        OccIndexError::Aborted(reason)
    }
}
