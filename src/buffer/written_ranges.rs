// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A sorted, coalesced set of half-open `[low, low + count)` integer
//! intervals over absolute stream offsets.
//!
//! This is the narrow `written_ranges` contract of §6/§3.2 of the spec: the
//! reassembly buffer only ever needs `add`, indexed `get`, `size` and `max`,
//! so this is a dedicated, smaller sibling of `s2n-quic-core`'s general
//! `interval_set::IntervalSet<T>` (itself a `VecDeque<Interval<T>>` scan +
//! coalesce), narrowed to `u64` stream offsets.

use alloc::collections::VecDeque;

/// A single coalesced `[low, low + count)` subrange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subrange {
    pub low: u64,
    pub count: u64,
}

impl Subrange {
    #[inline]
    pub fn high(&self) -> u64 {
        self.low + self.count
    }
}

/// A sorted, disjoint, coalesced set of `[low, low + count)` intervals.
#[derive(Debug, Default, Clone)]
pub struct WrittenRanges {
    ranges: VecDeque<Subrange>,
}

impl WrittenRanges {
    #[inline]
    pub fn new() -> Self {
        Self {
            ranges: VecDeque::new(),
        }
    }

    /// Inserts `[low, low + count)`, coalescing with any overlapping or
    /// adjacent neighbors. Returns `true` if the set's contents changed.
    #[inline]
    pub fn add_range(&mut self, low: u64, count: u64) -> bool {
        if count == 0 {
            return false;
        }
        let high = low + count;

        // find the first range whose high end is >= low: everything before
        // it ends strictly before `low` and can't be touched.
        let start = self
            .ranges
            .iter()
            .position(|r| r.high() >= low)
            .unwrap_or(self.ranges.len());

        // find the first range whose low is > high: everything from `start`
        // up to (not including) this one overlaps or is adjacent to the new
        // range and must be merged in.
        let end = self
            .ranges
            .iter()
            .skip(start)
            .position(|r| r.low > high)
            .map(|i| start + i)
            .unwrap_or(self.ranges.len());

        if start == end {
            // no overlap/adjacency: a genuinely new, disjoint interval
            self.ranges.insert(start, Subrange { low, count });
            return true;
        }

        let merged_low = self.ranges[start].low.min(low);
        let merged_high = self.ranges[end - 1].high().max(high);
        let merged = Subrange {
            low: merged_low,
            count: merged_high - merged_low,
        };

        let unchanged =
            end - start == 1 && self.ranges[start].low == merged_low && self.ranges[start].count == merged.count;
        if unchanged {
            return false;
        }

        self.ranges[start] = merged;
        if end - start > 1 {
            self.ranges.drain(start + 1..end);
        }
        true
    }

    #[inline]
    pub fn get(&self, index: usize) -> &Subrange {
        &self.ranges[index]
    }

    #[inline]
    pub fn get_safe(&self, index: usize) -> Option<&Subrange> {
        self.ranges.get(index)
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.ranges.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Removes the lowest range entirely, for discarding offsets that have
    /// fallen below a buffer's drained watermark.
    #[inline]
    pub fn drop_front(&mut self) {
        self.ranges.pop_front();
    }

    /// The highest offset covered by any range (inclusive), i.e. `high - 1`
    /// of the last range, matching `QuicRangeGetMaxSafe`.
    #[inline]
    pub fn max_safe(&self) -> Option<u64> {
        self.ranges.back().map(|r| r.high() - 1)
    }

    #[cfg(test)]
    fn invariants(&self) {
        let mut prev_high = None;
        for r in &self.ranges {
            assert!(r.count > 0);
            if let Some(prev_high) = prev_high {
                assert!(r.low > prev_high, "ranges must be disjoint and coalesced");
            }
            prev_high = Some(r.high());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesces_adjacent_and_overlapping() {
        let mut set = WrittenRanges::new();
        assert!(set.add_range(0, 4));
        assert_eq!(set.size(), 1);
        assert!(set.add_range(4, 4));
        assert_eq!(set.size(), 1);
        assert_eq!(set.get(0).low, 0);
        assert_eq!(set.get(0).count, 8);
        set.invariants();
    }

    #[test]
    fn keeps_disjoint_ranges_separate() {
        let mut set = WrittenRanges::new();
        assert!(set.add_range(4, 4));
        assert_eq!(set.size(), 1);
        assert!(set.add_range(0, 2));
        assert_eq!(set.size(), 2);
        set.invariants();
    }

    #[test]
    fn bridges_a_gap() {
        let mut set = WrittenRanges::new();
        set.add_range(0, 2);
        set.add_range(6, 2);
        assert_eq!(set.size(), 2);
        assert!(set.add_range(2, 4));
        assert_eq!(set.size(), 1);
        assert_eq!(set.get(0).low, 0);
        assert_eq!(set.get(0).count, 8);
        set.invariants();
    }

    #[test]
    fn duplicate_write_is_a_no_op() {
        let mut set = WrittenRanges::new();
        assert!(set.add_range(0, 4));
        assert!(!set.add_range(0, 4));
        assert!(!set.add_range(1, 2));
    }

    #[test]
    fn max_safe_tracks_the_last_range() {
        let mut set = WrittenRanges::new();
        assert_eq!(set.max_safe(), None);
        set.add_range(4, 4);
        assert_eq!(set.max_safe(), Some(7));
    }
}
