use log::trace;

use crate::data_store::ordered_index::{NodeId, ScanCallback};
use crate::data_store::versioned_record::RecordRef;
use crate::errors::{AbortReason, Result};
use crate::index::TxnIndex;
use crate::key_range::{KeyRange, hexify, next_key};
use crate::stats::ReadSite;
use crate::transaction::Transaction;

/// Receives the key/value pairs of a range scan in key order.
pub trait ScanVisitor {
    /// Returns `false` to stop the scan.
    fn visit(&mut self, key: &[u8], value: &[u8]) -> bool;
}

impl<F> ScanVisitor for F
where
    F: FnMut(&[u8], &[u8]) -> bool,
{
    fn visit(&mut self, key: &[u8], value: &[u8]) -> bool {
        self(key, value)
    }
}

/// Sits between the ordered index's traversal and the caller's visitor.
///
/// Serves the transaction's own writes in place of shared values, records the
/// gaps between delivered keys as absent ranges (or, for low-level scans,
/// pins the versions of visited nodes) and reads shared records through the
/// same checks as a point read.
struct RangeScanAdapter<'a, T: Transaction, V: ScanVisitor + ?Sized> {
    index: &'a TxnIndex,
    txn: &'a mut T,
    lower: &'a [u8],
    low_level: bool,
    /// Last key handed to the adapter, tracked outside low-level scans.
    prev_key: Option<Vec<u8>>,
    caller_stopped: bool,
    visitor: &'a mut V,
}

impl<T: Transaction, V: ScanVisitor + ?Sized> ScanCallback for RangeScanAdapter<'_, T, V> {
    fn on_resp_node(&mut self, node: NodeId, version: u64) -> Result<()> {
        // Outside low-level scans phantoms are caught per key through
        // absent ranges instead.
        if !self.low_level {
            return Ok(());
        }
        if !self
            .txn
            .context_for(self.index.id())
            .observe_node(node, version)
        {
            return Err(self.txn.abort(AbortReason::NodeScanReadVersionChanged));
        }
        Ok(())
    }

    fn invoke(
        &mut self,
        key: &[u8],
        record: &RecordRef,
        node: NodeId,
        version: u64,
    ) -> Result<bool> {
        self.txn.ensure_active()?;
        trace!("search range k: {} from <{}, version={}>", hexify(key), node, version);
        let index_id = self.index.id();

        if !self.low_level {
            let gap = match &self.prev_key {
                Some(prev) => KeyRange::bounded(next_key(prev), key),
                None => KeyRange::bounded(self.lower, key),
            };
            self.txn.context_for(index_id).add_absent_range(gap);
            self.prev_key = Some(key.to_vec());
        }

        let local = self.txn.context_for(index_id).local_search(key);
        let mut keep_going = true;
        if let Some(value) = local.as_deref() {
            if !value.is_empty() {
                // read own writes
                keep_going = self.visitor.visit(key, value);
            }
        }

        if !self.txn.context_for(index_id).has_read(record.id()) {
            let value = self
                .index
                .read_record(self.txn, record, None, ReadSite::Scan)?;
            trace!(
                "read {} <sz={}> (local_read={})",
                record.id(),
                value.len(),
                local.is_some()
            );
            if local.is_none() && !value.is_empty() {
                keep_going = self.visitor.visit(key, &value);
            }
        }

        if !keep_going {
            self.caller_stopped = true;
        }
        Ok(keep_going)
    }
}

impl TxnIndex {
    /// Scans `[lower, upper)` in key order, `upper == None` meaning `+inf`.
    ///
    /// Keys written by the transaction are delivered with their pending
    /// values; locally deleted keys are skipped. Unless the transaction uses
    /// low-level scans, every part of the range that held no key is recorded
    /// as an absent range, so a later insert into it can be detected at
    /// validation. If the visitor stops the scan, the range behind the last
    /// delivered key is left unrecorded.
    ///
    /// An empty range (`upper <= lower`) returns immediately without touching
    /// the index or the transaction's state.
    pub fn search_range<T, V>(
        &self,
        txn: &mut T,
        lower: &[u8],
        upper: Option<&[u8]>,
        visitor: &mut V,
    ) -> Result<()>
    where
        T: Transaction,
        V: ScanVisitor + ?Sized,
    {
        txn.ensure_active()?;
        if upper.is_some_and(|upper| upper <= lower) {
            return Ok(());
        }
        match upper {
            Some(upper) => trace!("{}::search_range [{}, {})", self.id(), hexify(lower), hexify(upper)),
            None => trace!("{}::search_range [{}, +inf)", self.id(), hexify(lower)),
        }

        let low_level = txn.flags().is_low_level_scan();
        let mut adapter = RangeScanAdapter {
            index: self,
            txn: &mut *txn,
            lower,
            low_level,
            prev_key: None,
            caller_stopped: false,
            visitor,
        };
        self.underlying().range_traverse(lower, upper, &mut adapter)?;
        let RangeScanAdapter {
            prev_key,
            caller_stopped,
            ..
        } = adapter;

        if caller_stopped || low_level {
            return Ok(());
        }
        let start = match prev_key {
            Some(prev) => next_key(&prev),
            None => lower.to_vec(),
        };
        txn.context_for(self.id())
            .add_absent_range(KeyRange::new(start, upper.map(<[u8]>::to_vec)));
        Ok(())
    }

    /// Collects `[lower, upper)` into a vector, stopping after `limit` pairs
    /// if given. A zero limit reads nothing.
    pub fn scan_collect<T: Transaction>(
        &self,
        txn: &mut T,
        lower: &[u8],
        upper: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        if limit == Some(0) {
            txn.ensure_active()?;
            return Ok(Vec::new());
        }
        let mut pairs = Vec::new();
        let mut visitor = |key: &[u8], value: &[u8]| {
            pairs.push((key.to_vec(), value.to_vec()));
            limit.is_none_or(|limit| pairs.len() < limit)
        };
        self.search_range(txn, lower, upper, &mut visitor)?;
        Ok(pairs)
    }
}
