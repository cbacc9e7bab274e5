use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use log::debug;
use parking_lot::RwLock;

use crate::data_store::versioned_record::RecordRef;
use crate::errors::Result;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a leaf node of the [`OrderedIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Visitor driven by [`OrderedIndex::range_traverse`].
pub trait ScanCallback {
    /// Called once for every node the traversal enters, before any of its keys.
    fn on_resp_node(&mut self, node: NodeId, version: u64) -> Result<()>;

    /// Called for every key in range, in key order. Returning `Ok(false)`
    /// stops the traversal; an error stops it and is returned to the caller.
    fn invoke(&mut self, key: &[u8], record: &RecordRef, node: NodeId, version: u64)
    -> Result<bool>;
}

/// Visitor driven by [`OrderedIndex::tree_walk`].
///
/// Each node is reported with `on_node_begin`, followed by `on_node_success`
/// if the node did not change while it was being visited, or by
/// `on_node_failure` otherwise. A failed node is visited again.
pub trait TreeWalker {
    fn on_node_begin(&mut self, node: NodeId, records: Vec<RecordRef>);
    fn on_node_success(&mut self);
    fn on_node_failure(&mut self);
}

struct Leaf {
    id: NodeId,
    inner: RwLock<LeafInner>,
}

struct LeafInner {
    /// Bumped on every change of `entries` or of the node's bounds.
    version: u64,
    entries: BTreeMap<Vec<u8>, RecordRef>,
    /// Exclusive upper bound of the keys this leaf owns. `None` for the
    /// rightmost leaf.
    high: Option<Vec<u8>>,
    next: Option<Arc<Leaf>>,
}

impl LeafInner {
    fn covers(&self, key: &[u8]) -> bool {
        self.high.as_deref().is_none_or(|high| key < high)
    }
}

impl Leaf {
    fn new(inner: LeafInner) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::next(),
            inner: RwLock::new(inner),
        })
    }

    fn empty() -> Arc<Self> {
        Self::new(LeafInner {
            version: 0,
            entries: BTreeMap::new(),
            high: None,
            next: None,
        })
    }
}

struct Routing {
    first: Arc<Leaf>,
    /// Low key -> leaf, for every leaf but the first. Low keys never change,
    /// so a stale lookup only ever lands to the left of the right leaf.
    by_low_key: BTreeMap<Vec<u8>, Arc<Leaf>>,
}

impl Routing {
    fn new() -> Self {
        Self {
            first: Leaf::empty(),
            by_low_key: BTreeMap::new(),
        }
    }
}

/// Concurrent ordered map from keys to [`RecordRef`]s.
///
/// Keys live in a right-linked list of leaves (a B-link layout). Each leaf
/// carries a version that changes whenever its contents change, which is what
/// low-level scans pin and what [`OrderedIndex::tree_walk`] validates.
pub struct OrderedIndex {
    fanout: usize,
    routing: RwLock<Routing>,
    len: AtomicUsize,
}

impl OrderedIndex {
    pub fn new(fanout: usize) -> Self {
        Self {
            fanout: fanout.max(2),
            routing: RwLock::new(Routing::new()),
            len: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of leaves currently linked into the index.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut leaf = Some(self.routing.read_recursive().first.clone());
        while let Some(current) = leaf {
            count += 1;
            leaf = current.inner.read_recursive().next.clone();
        }
        count
    }

    fn start_leaf(&self, key: &[u8]) -> Arc<Leaf> {
        let routing = self.routing.read_recursive();
        routing
            .by_low_key
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .map(|(_, leaf)| leaf.clone())
            .unwrap_or_else(|| routing.first.clone())
    }

    /// Exact lookup.
    pub fn search(&self, key: &[u8]) -> Option<RecordRef> {
        let mut leaf = self.start_leaf(key);
        loop {
            let next = {
                let inner = leaf.inner.read_recursive();
                if inner.covers(key) {
                    return inner.entries.get(key).cloned();
                }
                inner.next.clone()
            };
            leaf = next?;
        }
    }

    /// Inserts `record` under `key` unless the key is already present.
    ///
    /// Returns the record now stored under `key` and whether the insert
    /// collided with an existing entry.
    pub fn insert_if_absent(&self, key: Vec<u8>, record: RecordRef) -> (RecordRef, bool) {
        let mut leaf = self.start_leaf(&key);
        loop {
            let mut inner = leaf.inner.write();
            if !inner.covers(&key) {
                if let Some(next) = inner.next.clone() {
                    drop(inner);
                    leaf = next;
                    continue;
                }
            }
            if let Some(existing) = inner.entries.get(&key) {
                return (existing.clone(), true);
            }

            inner.entries.insert(key, record.clone());
            inner.version += 1;
            self.len.fetch_add(1, Ordering::AcqRel);
            let split = if inner.entries.len() > self.fanout {
                split_leaf(&mut inner)
            } else {
                None
            };
            drop(inner);

            if let Some((low_key, right)) = split {
                debug!("split {} at {} keys, new right sibling {}", leaf.id, self.fanout, right.id);
                self.routing.write().by_low_key.insert(low_key, right);
            }
            return (record, false);
        }
    }

    /// Visits every key in `[lower, upper)` in order. `upper == None` is `+inf`.
    pub fn range_traverse(
        &self,
        lower: &[u8],
        upper: Option<&[u8]>,
        callback: &mut dyn ScanCallback,
    ) -> Result<()> {
        if upper.is_some_and(|upper| upper <= lower) {
            return Ok(());
        }
        let upper_bound = upper.map_or(Bound::Unbounded, Bound::Excluded);

        let mut leaf = Some(self.start_leaf(lower));
        while let Some(current) = leaf {
            let (version, entries, high, next) = {
                let inner = current.inner.read_recursive();
                let entries: Vec<(Vec<u8>, RecordRef)> = inner
                    .entries
                    .range::<[u8], _>((Bound::Included(lower), upper_bound))
                    .map(|(key, record)| (key.clone(), record.clone()))
                    .collect();
                (inner.version, entries, inner.high.clone(), inner.next.clone())
            };
            leaf = next;

            if high.as_deref().is_some_and(|high| high <= lower) {
                continue;
            }

            callback.on_resp_node(current.id, version)?;
            for (key, record) in &entries {
                if !callback.invoke(key, record, current.id, version)? {
                    return Ok(());
                }
            }

            match (high.as_deref(), upper) {
                (None, _) => break,
                (Some(high), Some(upper)) if high >= upper => break,
                _ => {}
            }
        }
        Ok(())
    }

    /// Walks every leaf from left to right.
    pub fn tree_walk(&self, walker: &mut dyn TreeWalker) {
        let mut leaf = Some(self.routing.read_recursive().first.clone());
        while let Some(current) = leaf {
            loop {
                let (version, records, next) = {
                    let inner = current.inner.read_recursive();
                    let records: Vec<RecordRef> = inner.entries.values().cloned().collect();
                    (inner.version, records, inner.next.clone())
                };
                walker.on_node_begin(current.id, records);
                if current.inner.read_recursive().version == version {
                    walker.on_node_success();
                    leaf = next;
                    break;
                }
                walker.on_node_failure();
            }
        }
    }

    /// Drops every leaf and resets the index to a single empty leaf.
    pub fn clear(&self) {
        let old = {
            let mut routing = self.routing.write();
            std::mem::replace(&mut *routing, Routing::new())
        };
        self.len.store(0, Ordering::Release);
        unlink(old.first);
    }
}

impl Drop for OrderedIndex {
    fn drop(&mut self) {
        let first = self.routing.get_mut().first.clone();
        unlink(first);
    }
}

/// Moves the upper half of an overfull leaf into a new right sibling.
/// Returns the sibling's low key and the sibling.
fn split_leaf(inner: &mut LeafInner) -> Option<(Vec<u8>, Arc<Leaf>)> {
    let mid = inner.entries.keys().nth(inner.entries.len() / 2)?.clone();
    let upper = inner.entries.split_off(&mid);
    let right = Leaf::new(LeafInner {
        version: 0,
        entries: upper,
        high: inner.high.take(),
        next: inner.next.take(),
    });
    inner.high = Some(mid.clone());
    inner.next = Some(right.clone());
    inner.version += 1;
    Some((mid, right))
}

/// Breaks the right links one by one so dropping a long leaf chain does not
/// recurse.
fn unlink(first: Arc<Leaf>) {
    let mut leaf = Some(first);
    while let Some(current) = leaf {
        leaf = current.inner.write().next.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_store::versioned_record::VersionedRecord;

    fn record() -> RecordRef {
        Arc::new(VersionedRecord::new())
    }

    struct Collect {
        keys: Vec<Vec<u8>>,
        nodes: Vec<(NodeId, u64)>,
        stop_after: Option<usize>,
    }

    impl Collect {
        fn new(stop_after: Option<usize>) -> Self {
            Self {
                keys: Vec::new(),
                nodes: Vec::new(),
                stop_after,
            }
        }
    }

    impl ScanCallback for Collect {
        fn on_resp_node(&mut self, node: NodeId, version: u64) -> Result<()> {
            self.nodes.push((node, version));
            Ok(())
        }

        fn invoke(&mut self, key: &[u8], _: &RecordRef, _: NodeId, _: u64) -> Result<bool> {
            self.keys.push(key.to_vec());
            Ok(self.stop_after.is_none_or(|n| self.keys.len() < n))
        }
    }

    #[test]
    fn test_insert_if_absent_collides() {
        let index = OrderedIndex::new(4);
        let first = record();
        let (stored, collided) = index.insert_if_absent(b"a".to_vec(), first.clone());
        assert!(!collided);
        assert_eq!(stored.id(), first.id());

        let (existing, collided) = index.insert_if_absent(b"a".to_vec(), record());
        assert!(collided);
        assert_eq!(existing.id(), first.id());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_splits_keep_every_key_reachable() {
        let index = OrderedIndex::new(3);
        for i in (0..50u32).rev() {
            index.insert_if_absent(format!("k{:03}", i).into_bytes(), record());
        }
        assert_eq!(index.len(), 50);
        assert!(index.node_count() > 1);
        for i in 0..50u32 {
            assert!(index.search(format!("k{:03}", i).as_bytes()).is_some());
        }
        assert!(index.search(b"k050").is_none());

        let mut all = Collect::new(None);
        index.range_traverse(b"", None, &mut all).unwrap();
        let expected: Vec<Vec<u8>> = (0..50u32).map(|i| format!("k{:03}", i).into_bytes()).collect();
        assert_eq!(all.keys, expected);
    }

    #[test]
    fn test_range_traverse_bounds_and_stop() {
        let index = OrderedIndex::new(2);
        for key in ["a", "b", "c", "d", "e"] {
            index.insert_if_absent(key.as_bytes().to_vec(), record());
        }

        let mut bounded = Collect::new(None);
        index.range_traverse(b"b", Some(&b"d"[..]), &mut bounded).unwrap();
        assert_eq!(bounded.keys, vec![b"b".to_vec(), b"c".to_vec()]);

        let mut stopped = Collect::new(Some(2));
        index.range_traverse(b"a", None, &mut stopped).unwrap();
        assert_eq!(stopped.keys.len(), 2);

        let mut empty = Collect::new(None);
        index.range_traverse(b"d", Some(&b"b"[..]), &mut empty).unwrap();
        assert!(empty.keys.is_empty());
        assert!(empty.nodes.is_empty());
    }

    #[test]
    fn test_node_version_changes_on_insert() {
        let index = OrderedIndex::new(16);
        index.insert_if_absent(b"a".to_vec(), record());
        let mut before = Collect::new(None);
        index.range_traverse(b"", None, &mut before).unwrap();

        index.insert_if_absent(b"b".to_vec(), record());
        let mut after = Collect::new(None);
        index.range_traverse(b"", None, &mut after).unwrap();

        assert_eq!(before.nodes[0].0, after.nodes[0].0);
        assert_ne!(before.nodes[0].1, after.nodes[0].1);
    }

    #[test]
    fn test_split_siblings_get_fresh_ids() {
        let index = OrderedIndex::new(2);
        for i in 0..12u8 {
            index.insert_if_absent(vec![i], record());
        }
        let mut all = Collect::new(None);
        index.range_traverse(b"", None, &mut all).unwrap();
        assert_eq!(all.nodes.len(), index.node_count());
        // Ascending inserts only ever split the rightmost leaf.
        let ids: Vec<u64> = all.nodes.iter().map(|(node, _)| node.as_u64()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(all.nodes[0].0.to_string(), format!("node#{}", ids[0]));
    }

    struct CountingWalker {
        begun: usize,
        succeeded: usize,
        records: usize,
        staged: usize,
    }

    impl TreeWalker for CountingWalker {
        fn on_node_begin(&mut self, _: NodeId, records: Vec<RecordRef>) {
            self.begun += 1;
            self.staged = records.len();
        }

        fn on_node_success(&mut self) {
            self.succeeded += 1;
            self.records += self.staged;
        }

        fn on_node_failure(&mut self) {
            self.staged = 0;
        }
    }

    #[test]
    fn test_tree_walk_and_clear() {
        let index = OrderedIndex::new(2);
        for i in 0..10u8 {
            index.insert_if_absent(vec![i], record());
        }
        let mut walker = CountingWalker {
            begun: 0,
            succeeded: 0,
            records: 0,
            staged: 0,
        };
        index.tree_walk(&mut walker);
        assert_eq!(walker.records, 10);
        assert_eq!(walker.begun, index.node_count());
        assert_eq!(walker.succeeded, walker.begun);

        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.node_count(), 1);
        assert!(index.search(&[3]).is_none());
    }
}
