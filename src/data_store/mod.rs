/// The concurrent ordered index that maps keys to versioned records.
pub mod ordered_index;
/// Multi-version records with lock-free stabilizing reads.
pub mod versioned_record;
