use std::sync::atomic::Ordering;

use log::debug;

use crate::config::ReclamationMode;
use crate::data_store::ordered_index::{NodeId, TreeWalker};
use crate::data_store::versioned_record::RecordRef;
use crate::index::TxnIndex;
use crate::stats::PurgeStats;

/// Frees the storage of a record that has been unlinked from a purged index.
pub trait Reclaimer {
    fn reclaim(&self, record: &RecordRef);
}

/// Defers freeing until every reader pinned in the current epoch has moved on.
#[derive(Debug, Default, Clone, Copy)]
pub struct EpochReclaimer;

impl Reclaimer for EpochReclaimer {
    fn reclaim(&self, record: &RecordRef) {
        record.release();
    }
}

/// Frees at once. Only chosen when no reader can still reach the records.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateReclaimer;

impl Reclaimer for ImmediateReclaimer {
    fn reclaim(&self, record: &RecordRef) {
        // SAFETY: `TxnIndex::purge` selects this reclaimer only when no
        // background task runs, and its caller guarantees that no
        // transaction uses the index any more.
        unsafe { record.release_immediate() };
    }
}

/// Walks every node of a purged index and reclaims the records it holds.
///
/// Records of a node are staged on entry and only reclaimed once the walk
/// reports that the node was visited consistently. A node that changed while
/// it was visited is dropped without reclaiming and visited again.
struct PurgeWalker<'a> {
    reclaimer: &'a dyn Reclaimer,
    staged: Vec<RecordRef>,
    stats: Option<PurgeStats>,
}

impl<'a> PurgeWalker<'a> {
    fn new(reclaimer: &'a dyn Reclaimer, collect_stats: bool) -> Self {
        Self {
            reclaimer,
            staged: Vec::new(),
            stats: collect_stats.then(PurgeStats::default),
        }
    }
}

impl TreeWalker for PurgeWalker<'_> {
    fn on_node_begin(&mut self, _node: NodeId, records: Vec<RecordRef>) {
        debug_assert!(self.staged.is_empty());
        self.staged = records;
    }

    fn on_node_success(&mut self) {
        let keys = self.staged.len();
        for record in self.staged.drain(..) {
            if let Some(stats) = self.stats.as_mut() {
                *stats.record_size_counts.entry(record.latest_size()).or_insert(0) += 1;
                *stats.alloc_size_counts.entry(record.alloc_size()).or_insert(0) += 1;
            }
            self.reclaimer.reclaim(&record);
        }
        if let Some(stats) = self.stats.as_mut() {
            stats.keys_per_node.push(keys);
            stats.nodes += 1;
            if keys == 0 {
                stats.empty_nodes += 1;
            }
        }
    }

    fn on_node_failure(&mut self) {
        self.staged.clear();
    }
}

impl TxnIndex {
    /// Irreversibly destroys the index: stops background tasks, reclaims
    /// every record and empties the ordered index.
    ///
    /// Returns purge statistics if `collect_stats` is set or the index is
    /// configured to collect them.
    ///
    /// # Panics
    ///
    /// If the index was already purged.
    ///
    /// # Safety
    ///
    /// Unless records are reclaimed through the epoch collector
    /// ([`ReclamationMode::Deferred`], or a handler that reports background
    /// tasks), no transaction may access the index concurrently with or
    /// after the purge.
    pub unsafe fn purge(&self, collect_stats: bool) -> Option<PurgeStats> {
        assert!(
            !self.destructed.swap(true, Ordering::AcqRel),
            "index {} purged twice",
            self.config.name
        );
        debug!("purging index {} ({} keys)", self.config.name, self.underlying.len());

        // Background tasks must be gone before records are reclaimed.
        self.handler.on_destruct();

        let reclaimer = self.reclaimer();
        let mut walker = PurgeWalker::new(reclaimer, collect_stats || self.config.collect_purge_stats);
        self.underlying.tree_walk(&mut walker);
        self.underlying.clear();

        let stats = walker.stats;
        if let Some(stats) = &stats {
            stats.dump(&self.config.name);
        }
        debug!("index {} purged", self.config.name);
        stats
    }

    /// Records are reclaimed through the epoch collector whenever the handler
    /// reports background tasks, whatever the configured mode.
    fn defers_reclamation(&self) -> bool {
        let background = self.handler.has_background_task();
        match self.config.reclamation {
            ReclamationMode::Deferred => true,
            ReclamationMode::Auto => background,
            ReclamationMode::Immediate => {
                if background {
                    debug!(
                        "index {} has background tasks, reclaiming deferred despite immediate reclamation",
                        self.config.name
                    );
                }
                background
            }
        }
    }

    fn reclaimer(&self) -> &'static dyn Reclaimer {
        if self.defers_reclamation() {
            &EpochReclaimer
        } else {
            &ImmediateReclaimer
        }
    }
}
