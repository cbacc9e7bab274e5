use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transaction::TxnState;

/// Reasons for which a transaction is aborted while it is still executing.
///
/// Every reason is first handed to the transaction (see
/// [`Transaction::abort`](crate::transaction::Transaction::abort)) and then
/// surfaced to the caller as [`OccIndexError::Aborted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbortReason {
    /// A record could not be read at a stable point because a writer held it.
    UnstableRead,
    /// The observed version is not visible under the transaction's isolation rule.
    FutureTidRead,
    /// The same record yielded two different timestamps within one transaction.
    ReadNodeInterference,
    /// A low-level scan observed an index node change between visits.
    NodeScanReadVersionChanged,
    /// An expected-new insert collided with an existing entry for the key.
    WriteNodeInterference,
    /// The caller violated a user-level contract, e.g. a write in a read-only transaction.
    User,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::UnstableRead => "UNSTABLE_READ",
            AbortReason::FutureTidRead => "FUTURE_TID_READ",
            AbortReason::ReadNodeInterference => "READ_NODE_INTERFERENCE",
            AbortReason::NodeScanReadVersionChanged => "NODE_SCAN_READ_VERSION_CHANGED",
            AbortReason::WriteNodeInterference => "WRITE_NODE_INTERFERENCE",
            AbortReason::User => "USER",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OccIndexError {
    #[error("Transaction aborted: {0}")]
    Aborted(AbortReason),

    #[error("Transaction is not active (state: {0:?})")]
    NotActive(TxnState),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl OccIndexError {
    /// Returns the abort reason if this error is a transaction abort.
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            OccIndexError::Aborted(reason) => Some(*reason),
            _ => None,
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, OccIndexError::Aborted(_))
    }
}

pub type Result<T> = std::result::Result<T, OccIndexError>;
