//! Vector clocks.

use crate::ids::ReplicaId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Causal relation between two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    /// `self` happened before `other`.
    Before,
    /// `self` happened after `other`.
    After,
    /// Both clocks are identical.
    Equal,
    /// Neither clock dominates the other.
    Concurrent,
}

/// Map from replica to the number of that replica's database versions
/// seen. Missing entries count as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock(BTreeMap<ReplicaId, u64>);

impl VectorClock {
    /// Creates an empty clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter for `replica`, 0 if absent.
    #[must_use]
    pub fn get(&self, replica: &ReplicaId) -> u64 {
        self.0.get(replica).copied().unwrap_or(0)
    }

    /// Sets the counter for `replica`. Zero removes the entry.
    pub fn set(&mut self, replica: ReplicaId, value: u64) {
        if value == 0 {
            self.0.remove(&replica);
        } else {
            self.0.insert(replica, value);
        }
    }

    /// Increments the counter for `replica` and returns the new value.
    pub fn increment(&mut self, replica: &ReplicaId) -> u64 {
        let entry = self.0.entry(replica.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Pointwise maximum with `other`.
    pub fn merge(&mut self, other: &VectorClock) {
        for (replica, &value) in &other.0 {
            let entry = self.0.entry(replica.clone()).or_insert(0);
            *entry = (*entry).max(value);
        }
    }

    /// Causal comparison.
    #[must_use]
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let mut less = false;
        let mut greater = false;
        for replica in self.0.keys().chain(other.0.keys()) {
            match self.get(replica).cmp(&other.get(replica)) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
            if less && greater {
                return ClockOrdering::Concurrent;
            }
        }
        match (less, greater) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Before,
            (false, true) => ClockOrdering::After,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// True if every counter of `self` is at least the one in `other`.
    #[must_use]
    pub fn dominates(&self, other: &VectorClock) -> bool {
        matches!(
            self.compare(other),
            ClockOrdering::After | ClockOrdering::Equal
        )
    }

    /// Iterates over non-zero entries in replica order.
    pub fn iter(&self) -> impl Iterator<Item = (&ReplicaId, u64)> {
        self.0.iter().map(|(r, v)| (r, *v))
    }

    /// Returns true if no replica has a non-zero counter.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.values().all(|v| *v == 0)
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (replica, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{replica}:{value}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn r(name: &str) -> ReplicaId {
        ReplicaId::new(name).unwrap()
    }

    fn clock(entries: &[(&str, u64)]) -> VectorClock {
        let mut c = VectorClock::new();
        for (name, v) in entries {
            c.set(r(name), *v);
        }
        c
    }

    #[test]
    fn compare_basic() {
        let a1 = clock(&[("a", 1)]);
        let a2 = clock(&[("a", 2)]);
        let a1b1 = clock(&[("a", 1), ("b", 1)]);
        let b1 = clock(&[("b", 1)]);

        assert_eq!(a1.compare(&a1), ClockOrdering::Equal);
        assert_eq!(a1.compare(&a2), ClockOrdering::Before);
        assert_eq!(a2.compare(&a1), ClockOrdering::After);
        assert_eq!(a1.compare(&a1b1), ClockOrdering::Before);
        assert_eq!(a2.compare(&a1b1), ClockOrdering::Concurrent);
        assert_eq!(a1.compare(&b1), ClockOrdering::Concurrent);
        assert_eq!(VectorClock::new().compare(&a1), ClockOrdering::Before);
    }

    #[test]
    fn zero_entries_are_absent() {
        let mut c = clock(&[("a", 0), ("b", 2)]);
        assert_eq!(c, clock(&[("b", 2)]));
        c.set(r("b"), 0);
        assert!(c.is_empty());
    }

    #[test]
    fn merge_is_pointwise_max() {
        let mut c = clock(&[("a", 3), ("b", 1)]);
        c.merge(&clock(&[("b", 4), ("c", 2)]));
        assert_eq!(c, clock(&[("a", 3), ("b", 4), ("c", 2)]));
    }

    #[test]
    fn increment_and_dominates() {
        let mut c = VectorClock::new();
        assert_eq!(c.increment(&r("a")), 1);
        assert_eq!(c.increment(&r("a")), 2);
        assert!(c.dominates(&clock(&[("a", 1)])));
        assert!(!clock(&[("a", 1)]).dominates(&c));
    }

    #[test]
    fn display() {
        assert_eq!(clock(&[("b", 2), ("a", 1)]).to_string(), "{a:1, b:2}");
    }

    fn arb_clock() -> impl Strategy<Value = VectorClock> {
        prop::collection::vec(0u64..4, 3).prop_map(|counts| {
            let mut c = VectorClock::new();
            for (name, count) in ["a", "b", "c"].iter().zip(counts) {
                c.set(r(name), count);
            }
            c
        })
    }

    fn mirrored(ordering: ClockOrdering) -> ClockOrdering {
        match ordering {
            ClockOrdering::Before => ClockOrdering::After,
            ClockOrdering::After => ClockOrdering::Before,
            other => other,
        }
    }

    proptest! {
        #[test]
        fn compare_is_antisymmetric(x in arb_clock(), y in arb_clock()) {
            prop_assert_eq!(y.compare(&x), mirrored(x.compare(&y)));
            prop_assert_eq!(x.compare(&y) == ClockOrdering::Equal, x == y);
        }

        #[test]
        fn merge_dominates_both_sides(x in arb_clock(), y in arb_clock()) {
            let mut xy = x.clone();
            xy.merge(&y);
            let mut yx = y.clone();
            yx.merge(&x);
            prop_assert_eq!(&xy, &yx);
            prop_assert!(xy.dominates(&x));
            prop_assert!(xy.dominates(&y));
        }
    }
}
