use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Diagnostic event counters kept per index.
#[derive(Debug, Default)]
pub struct IndexCounters {
    read_logical_deleted_search: AtomicU64,
    read_logical_deleted_scan: AtomicU64,
}

impl IndexCounters {
    pub(crate) fn record_logical_delete(&self, site: ReadSite) {
        let counter = match site {
            ReadSite::Search => &self.read_logical_deleted_search,
            ReadSite::Scan => &self.read_logical_deleted_scan,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of point reads that observed a logically deleted record.
    pub fn read_logical_deleted_search(&self) -> u64 {
        self.read_logical_deleted_search.load(Ordering::Relaxed)
    }

    /// Number of scan reads that observed a logically deleted record.
    pub fn read_logical_deleted_scan(&self) -> u64 {
        self.read_logical_deleted_scan.load(Ordering::Relaxed)
    }
}

/// Which read path touched a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadSite {
    Search,
    Scan,
}

/// Statistics gathered while purging an index.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeStats {
    /// Size of the latest value -> number of records.
    pub record_size_counts: BTreeMap<usize, u64>,
    /// Bytes held by the whole version chain -> number of records.
    pub alloc_size_counts: BTreeMap<usize, u64>,
    /// Keys held by each purged node, in walk order.
    pub keys_per_node: Vec<usize>,
    pub nodes: u64,
    /// Nodes that held no keys at all.
    ///
    /// Layered trees count nodes whose keys all end in that node, without a
    /// suffix stored further down. Leaves here hold whole keys, so that count
    /// would always equal `nodes`; empty leaves are counted in its place.
    pub empty_nodes: u64,
}

impl PurgeStats {
    pub fn records(&self) -> u64 {
        self.record_size_counts.values().sum()
    }

    pub(crate) fn dump(&self, index_name: &str) {
        log::debug!(
            "purge of {}: {} nodes ({} empty), {} records",
            index_name,
            self.nodes,
            self.empty_nodes,
            self.records()
        );
        for (size, count) in &self.record_size_counts {
            log::debug!("  record size {} -> {}", size, count);
        }
        for (size, count) in &self.alloc_size_counts {
            log::debug!("  alloc size {} -> {}", size, count);
        }
    }
}
