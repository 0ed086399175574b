//! Innermost-range lookup over nested V8 block ranges.
//!
//! The ranges are swept once into a flat table of segments, each carrying the
//! count of the smallest range covering it, so a lookup is one binary search.

use super::{V8Function, V8Range};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

/// Maximal run of offsets covered by the same innermost range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    start: u32,
    count: Option<u64>,
}

/// Sorted view over all ranges of a script.
///
/// Ranges are ordered by start offset ascending, then end offset descending,
/// so a parent always precedes the children that share its start.
#[derive(Debug, Clone, Default)]
pub struct RangeIndex {
    len: usize,
    segments: Vec<Segment>,
}

impl RangeIndex {
    /// Build an index from raw ranges
    #[must_use]
    pub fn new(mut ranges: Vec<V8Range>) -> Self {
        ranges.retain(|r| !r.is_empty());
        ranges.sort_by(|a, b| {
            a.start_offset
                .cmp(&b.start_offset)
                .then(b.end_offset.cmp(&a.end_offset))
        });
        Self {
            len: ranges.len(),
            segments: sweep(&ranges),
        }
    }

    /// Build an index from every range of every function
    #[must_use]
    pub fn from_functions(functions: &[V8Function]) -> Self {
        Self::new(
            functions
                .iter()
                .flat_map(|f| f.ranges.iter().copied())
                .collect(),
        )
    }

    /// Number of indexed ranges
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the index is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Count of the smallest range containing `offset`.
    ///
    /// Returns `None` when no range contains the offset. Among equally sized
    /// candidates the one sorted last (the deeper one) wins.
    #[must_use]
    pub fn count_at(&self, offset: u32) -> Option<u64> {
        let upper = self.segments.partition_point(|s| s.start <= offset);
        upper
            .checked_sub(1)
            .and_then(|i| self.segments[i].count)
    }

    /// Count at `offset`, treating uncovered offsets as never executed
    #[must_use]
    pub fn count_or_zero(&self, offset: u32) -> u64 {
        self.count_at(offset).unwrap_or(0)
    }
}

/// Innermost count between consecutive range boundaries of sorted `ranges`
fn sweep(ranges: &[V8Range]) -> Vec<Segment> {
    let mut boundaries: Vec<u32> = ranges
        .iter()
        .flat_map(|r| [r.start_offset, r.end_offset])
        .collect();
    boundaries.sort_unstable();
    boundaries.dedup();

    // smallest length first, then the range sorted last
    let mut active: BTreeSet<(u32, Reverse<usize>)> = BTreeSet::new();
    let mut ending: BinaryHeap<Reverse<(u32, usize)>> = BinaryHeap::new();
    let mut next = 0;
    let mut segments: Vec<Segment> = Vec::with_capacity(boundaries.len());

    for boundary in boundaries {
        while let Some(&Reverse((end, i))) = ending.peek() {
            if end > boundary {
                break;
            }
            ending.pop();
            active.remove(&(ranges[i].len(), Reverse(i)));
        }
        while next < ranges.len() && ranges[next].start_offset == boundary {
            active.insert((ranges[next].len(), Reverse(next)));
            ending.push(Reverse((ranges[next].end_offset, next)));
            next += 1;
        }
        let count = active.first().map(|&(_, Reverse(i))| ranges[i].count);
        if segments.last().map(|s| s.count) != Some(count) {
            segments.push(Segment {
                start: boundary,
                count,
            });
        }
    }
    segments
}
