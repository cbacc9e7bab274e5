use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering, fence};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::Backoff;

/// Commit timestamp of a version.
pub type Tid = u64;

/// Every record exists at `MIN_TID` with no value.
pub const MIN_TID: Tid = 0;

/// Reading at `MAX_TID` returns the latest committed version.
pub const MAX_TID: Tid = u64::MAX;

/// Shared handle to a record stored in the ordered index.
pub type RecordRef = Arc<VersionedRecord>;

const LOCKED: u64 = 1;
const RETIRED: u64 = 1 << 1;
const COUNTER_STEP: u64 = 1 << 2;

static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a [`VersionedRecord`].
///
/// Transactions key their read sets by this handle rather than by key, so two
/// records that happen to hold the same key over time are never confused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u64);

impl RecordId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rec#{}", self.0)
    }
}

/// A value observed at a stable point of a record's version chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StableValue {
    /// Commit timestamp of the observed version.
    pub tid: Tid,
    /// The observed value. Empty means the key is logically deleted.
    pub value: Vec<u8>,
}

struct Version {
    tid: Tid,
    value: Vec<u8>,
    older: Atomic<Version>,
}

/// One key's chain of committed values, newest first.
///
/// Readers never block: [`VersionedRecord::stable_read`] validates against a
/// header word that writers bump under [`VersionedRecord::write_lock`], and
/// version nodes are only freed through the epoch collector (or through
/// [`VersionedRecord::release_immediate`] once no reader can reach them).
pub struct VersionedRecord {
    id: RecordId,
    /// `LOCKED | RETIRED | change counter`
    header: AtomicU64,
    head: Atomic<Version>,
    alloc_size: AtomicUsize,
}

impl Default for VersionedRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionedRecord {
    /// Creates a record with an empty chain. It reads as `(MIN_TID, empty)`
    /// until a version is installed.
    pub fn new() -> Self {
        Self {
            id: RecordId(NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed)),
            header: AtomicU64::new(0),
            head: Atomic::null(),
            alloc_size: AtomicUsize::new(0),
        }
    }

    /// Creates a record holding a single committed version.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use occindex::prelude::*;
    ///
    /// let record = VersionedRecord::with_version(7, b"hello".to_vec());
    /// let observed = record.stable_read(MAX_TID, false, None).unwrap();
    /// assert_eq!(observed.tid, 7);
    /// assert_eq!(observed.value, b"hello");
    /// ```
    pub fn with_version(tid: Tid, value: Vec<u8>) -> Self {
        let record = Self::new();
        record.install(tid, value);
        record
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Warms the cache line holding the header. Has no semantic effect.
    #[inline]
    pub fn prefetch(&self) {
        let _ = self.header.load(Ordering::Relaxed);
    }

    pub fn is_locked(&self) -> bool {
        self.header.load(Ordering::Acquire) & LOCKED != 0
    }

    pub fn is_retired(&self) -> bool {
        self.header.load(Ordering::Acquire) & RETIRED != 0
    }

    /// Acquires the record's writer lock. Readers that meet a locked record
    /// back off and eventually report the read as unstable.
    pub fn write_lock(&self) -> RecordWriteGuard<'_> {
        let backoff = Backoff::new();
        loop {
            let header = self.header.load(Ordering::Relaxed);
            if header & LOCKED == 0
                && self
                    .header
                    .compare_exchange_weak(
                        header,
                        header | LOCKED,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
            {
                return RecordWriteGuard { record: self };
            }
            backoff.snooze();
        }
    }

    /// Publishes a new committed version. Shorthand for locking, installing
    /// and unlocking.
    pub fn install(&self, tid: Tid, value: Vec<u8>) {
        self.write_lock().install(tid, value);
    }

    /// Reads the newest version whose timestamp is `<= at`, truncated to
    /// `max_bytes` when given.
    ///
    /// Returns `None` if no stable value could be obtained: a writer held the
    /// record for longer than the reader was willing to back off, or the
    /// record has been released.
    ///
    /// `read_only_hint` lets readers that landed on a version behind the head
    /// skip revalidation: such versions are immutable and every version
    /// installed later is newer than `at`.
    pub fn stable_read(
        &self,
        at: Tid,
        read_only_hint: bool,
        max_bytes: Option<usize>,
    ) -> Option<StableValue> {
        let backoff = Backoff::new();
        loop {
            let before = self.header.load(Ordering::Acquire);
            if before & RETIRED != 0 {
                return None;
            }
            if before & LOCKED != 0 {
                if backoff.is_completed() {
                    return None;
                }
                backoff.snooze();
                continue;
            }

            let guard = epoch::pin();
            let head = self.head.load(Ordering::Acquire, &guard);
            let (version, from_head) = Self::visible_version(head, at, &guard);
            let observed = match version {
                Some(v) => StableValue {
                    tid: v.tid,
                    value: truncate(&v.value, max_bytes),
                },
                None => StableValue {
                    tid: MIN_TID,
                    value: Vec::new(),
                },
            };

            if read_only_hint && version.is_some() && !from_head {
                return Some(observed);
            }

            fence(Ordering::Acquire);
            if self.header.load(Ordering::Relaxed) == before {
                return Some(observed);
            }
            if backoff.is_completed() {
                return None;
            }
            backoff.snooze();
        }
    }

    fn visible_version<'g>(
        head: Shared<'g, Version>,
        at: Tid,
        guard: &'g Guard,
    ) -> (Option<&'g Version>, bool) {
        let mut current = head;
        let mut from_head = true;
        // SAFETY: nodes reachable from `head` are only destroyed through the
        // epoch collector, and we hold `guard`.
        while let Some(version) = unsafe { current.as_ref() } {
            if version.tid <= at {
                return (Some(version), from_head);
            }
            from_head = false;
            current = version.older.load(Ordering::Acquire, guard);
        }
        (None, from_head)
    }

    /// Size of the newest value, zero if the chain is empty.
    pub fn latest_size(&self) -> usize {
        let guard = epoch::pin();
        let head = self.head.load(Ordering::Acquire, &guard);
        // SAFETY: protected by `guard`.
        unsafe { head.as_ref() }.map_or(0, |v| v.value.len())
    }

    /// Bytes held by the whole version chain.
    pub fn alloc_size(&self) -> usize {
        self.alloc_size.load(Ordering::Relaxed)
    }

    /// Retires the record and hands its version chain to the epoch collector.
    /// Readers that are still walking the chain keep it alive until they unpin.
    pub fn release(&self) {
        let _lock = self.retire();
        let guard = epoch::pin();
        let mut current = self.head.swap(Shared::null(), Ordering::AcqRel, &guard);
        while !current.is_null() {
            // SAFETY: `current` was unlinked from the record, and every node
            // behind it is only reachable through it.
            unsafe {
                let next = current.deref().older.load(Ordering::Acquire, &guard);
                guard.defer_destroy(current);
                current = next;
            }
        }
        self.alloc_size.store(0, Ordering::Relaxed);
    }

    /// Retires the record and frees its version chain right away.
    ///
    /// # Safety
    ///
    /// No other thread may be inside [`VersionedRecord::stable_read`] or
    /// [`VersionedRecord::latest_size`] on this record, now or later.
    pub unsafe fn release_immediate(&self) {
        let _lock = self.retire();
        // SAFETY: the caller guarantees there are no concurrent readers.
        unsafe { free_chain(&self.head) };
        self.alloc_size.store(0, Ordering::Relaxed);
    }

    fn retire(&self) -> RecordWriteGuard<'_> {
        let lock = self.write_lock();
        self.header.fetch_or(RETIRED, Ordering::AcqRel);
        lock
    }
}

impl Drop for VersionedRecord {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no reader holds the record.
        unsafe { free_chain(&self.head) };
    }
}

impl fmt::Debug for VersionedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = self.header.load(Ordering::Relaxed);
        f.debug_struct("VersionedRecord")
            .field("id", &self.id)
            .field("locked", &(header & LOCKED != 0))
            .field("retired", &(header & RETIRED != 0))
            .field("alloc_size", &self.alloc_size())
            .finish()
    }
}

/// Exclusive writer access to a record. Dropping it unlocks the record and
/// bumps the change counter, invalidating concurrent stable reads.
pub struct RecordWriteGuard<'a> {
    record: &'a VersionedRecord,
}

impl RecordWriteGuard<'_> {
    pub fn install(&mut self, tid: Tid, value: Vec<u8>) {
        let record = self.record;
        let guard = epoch::pin();
        let head = record.head.load(Ordering::Acquire, &guard);
        // SAFETY: protected by `guard`.
        if let Some(newest) = unsafe { head.as_ref() } {
            debug_assert!(tid >= newest.tid, "versions must be installed in tid order");
        }
        record
            .alloc_size
            .fetch_add(value.len(), Ordering::Relaxed);
        let version = Owned::new(Version {
            tid,
            value,
            older: Atomic::from(head),
        });
        record.head.store(version, Ordering::Release);
    }
}

impl Drop for RecordWriteGuard<'_> {
    fn drop(&mut self) {
        // LOCKED is set, so adding `COUNTER_STEP - LOCKED` clears it and
        // advances the counter in one step.
        self.record
            .header
            .fetch_add(COUNTER_STEP - LOCKED, Ordering::Release);
    }
}

unsafe fn free_chain(head: &Atomic<Version>) {
    // SAFETY: the caller guarantees exclusive access to the chain.
    unsafe {
        let guard = epoch::unprotected();
        let mut current = head.swap(Shared::null(), Ordering::AcqRel, guard);
        while !current.is_null() {
            let next = current.deref().older.load(Ordering::Relaxed, guard);
            drop(current.into_owned());
            current = next;
        }
    }
}

fn truncate(value: &[u8], max_bytes: Option<usize>) -> Vec<u8> {
    match max_bytes {
        Some(max) if value.len() > max => value[..max].to_vec(),
        _ => value.to_vec(),
    }
}
