use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

/// Returns the smallest key strictly greater than `key` in lexicographic order.
///
/// Appending a zero byte gives the immediate successor: no key can sort
/// between `key` and `key\0`.
pub fn next_key(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    next
}

/// A half-open key interval `[lower, upper)`. `upper == None` means `+inf`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct KeyRange {
    pub lower: Vec<u8>,
    pub upper: Option<Vec<u8>>,
}

impl KeyRange {
    pub fn new(lower: impl Into<Vec<u8>>, upper: Option<Vec<u8>>) -> Self {
        Self {
            lower: lower.into(),
            upper,
        }
    }

    pub fn bounded(lower: impl Into<Vec<u8>>, upper: impl Into<Vec<u8>>) -> Self {
        Self::new(lower, Some(upper.into()))
    }

    pub fn unbounded(lower: impl Into<Vec<u8>>) -> Self {
        Self::new(lower, None)
    }

    pub fn is_empty_range(&self) -> bool {
        match &self.upper {
            Some(upper) => upper.as_slice() <= self.lower.as_slice(),
            None => false,
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        if key < self.lower.as_slice() {
            return false;
        }
        match &self.upper {
            Some(upper) => key < upper.as_slice(),
            None => true,
        }
    }
}

impl fmt::Debug for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, ", hexify(&self.lower))?;
        match &self.upper {
            Some(upper) => write!(f, "{})", hexify(upper)),
            None => write!(f, "+inf)"),
        }
    }
}

/// A set of keys made of half-open ranges, kept sorted and disjoint.
///
/// Ranges that overlap or touch are merged on insert, so membership is a
/// single lookup of the range starting at or before the key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRangeSet {
    /// lower -> upper, `None` meaning `+inf`.
    ranges: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl KeyRangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of disjoint ranges in the set.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Adds `range` to the set. Empty ranges are ignored.
    pub fn insert(&mut self, range: KeyRange) {
        if range.is_empty_range() {
            return;
        }
        let KeyRange { mut lower, mut upper } = range;

        let before = self
            .ranges
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(lower.as_slice())))
            .next_back()
            .map(|(l, u)| (l.clone(), u.clone()));
        if let Some((prev_lower, prev_upper)) = before {
            if prev_upper.as_deref().is_none_or(|prev| lower.as_slice() <= prev) {
                lower = prev_lower;
                upper = max_upper(prev_upper, upper);
            }
        }

        // Absorb every range that starts inside `[lower, upper]`.
        loop {
            let next = self
                .ranges
                .range::<[u8], _>((Bound::Included(lower.as_slice()), Bound::Unbounded))
                .next()
                .filter(|(next_lower, _)| {
                    upper
                        .as_deref()
                        .is_none_or(|upper| next_lower.as_slice() <= upper)
                })
                .map(|(l, u)| (l.clone(), u.clone()));
            let Some((next_lower, next_upper)) = next else {
                break;
            };
            self.ranges.remove(&next_lower);
            upper = max_upper(upper, next_upper);
        }
        self.ranges.insert(lower, upper);
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.ranges
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .is_some_and(|(_, upper)| upper.as_deref().is_none_or(|upper| key < upper))
    }

    /// The ranges in key order.
    pub fn iter(&self) -> impl Iterator<Item = KeyRange> + '_ {
        self.ranges
            .iter()
            .map(|(lower, upper)| KeyRange::new(lower.clone(), upper.clone()))
    }
}

fn max_upper(a: Option<Vec<u8>>, b: Option<Vec<u8>>) -> Option<Vec<u8>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        _ => None,
    }
}

pub(crate) fn hexify(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_key_is_immediate_successor() {
        let k = b"b".to_vec();
        let n = next_key(&k);
        assert_eq!(n, b"b\0".to_vec());
        assert!(n.as_slice() > k.as_slice());
        assert!(n.as_slice() < b"b\x00\x00".as_slice());
        assert!(n.as_slice() < b"c".as_slice());
    }

    #[test]
    fn test_empty_ranges() {
        assert!(KeyRange::bounded("b", "b").is_empty_range());
        assert!(KeyRange::bounded("c", "b").is_empty_range());
        assert!(!KeyRange::bounded("a", "b").is_empty_range());
        assert!(!KeyRange::unbounded("zzz").is_empty_range());
    }

    #[test]
    fn test_contains_is_half_open() {
        let r = KeyRange::bounded("b", "d");
        assert!(!r.contains(b"a"));
        assert!(r.contains(b"b"));
        assert!(r.contains(b"c\xff"));
        assert!(!r.contains(b"d"));
        assert!(KeyRange::unbounded("b").contains(b"\xff\xff"));
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", KeyRange::bounded("a", "b")), "[61, 62)");
        assert_eq!(format!("{:?}", KeyRange::unbounded("a")), "[61, +inf)");
    }

    fn ranges(set: &KeyRangeSet) -> Vec<KeyRange> {
        set.iter().collect()
    }

    #[test]
    fn test_range_set_keeps_disjoint_ranges_apart() {
        let mut set = KeyRangeSet::new();
        set.insert(KeyRange::bounded(next_key(b"b"), "d"));
        set.insert(KeyRange::bounded("a", "b"));
        set.insert(KeyRange::bounded("c", "c"));
        assert_eq!(
            ranges(&set),
            vec![KeyRange::bounded("a", "b"), KeyRange::bounded(next_key(b"b"), "d")]
        );
        assert!(set.contains(b"a"));
        assert!(!set.contains(b"b"));
        assert!(set.contains(b"b\0"));
        assert!(!set.contains(b"d"));
    }

    #[test]
    fn test_range_set_merges_touching_and_overlapping() {
        let mut set = KeyRangeSet::new();
        set.insert(KeyRange::bounded("a", "c"));
        set.insert(KeyRange::bounded("c", "e"));
        assert_eq!(ranges(&set), vec![KeyRange::bounded("a", "e")]);

        set.insert(KeyRange::bounded("g", "h"));
        set.insert(KeyRange::bounded("j", "k"));
        set.insert(KeyRange::bounded("b", "i"));
        assert_eq!(
            ranges(&set),
            vec![KeyRange::bounded("a", "i"), KeyRange::bounded("j", "k")]
        );

        set.insert(KeyRange::unbounded("d"));
        assert_eq!(ranges(&set), vec![KeyRange::unbounded("a")]);
        assert!(set.contains(b"\xff"));
        assert!(!set.contains(b""));

        // Re-inserting a covered range changes nothing.
        set.insert(KeyRange::bounded("x", "y"));
        assert_eq!(set.len(), 1);
    }
}
