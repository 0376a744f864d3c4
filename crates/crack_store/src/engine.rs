//! Adaptive indexing over a single integer column via database cracking.
//!
//! The engine owns a mutable array and an ordered crack index mapping values
//! to partition positions. Range queries reorganize the array in place, so
//! queries over previously touched ranges get cheaper without any declared
//! index. Point inserts/removes are queued and absorbed lazily by the next
//! query whose range covers them.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::Instant;

/// One crack point: `pos` partitions the array around the entry's key.
///
/// `holes` and `sorted` are headroom for update-aware and sorted-piece
/// refinements; the base engine keeps `holes == 0` and never reads `sorted`.
#[derive(Debug, Clone, Copy)]
pub struct CrackEntry {
    pub pos: usize,
    pub holes: usize,
    pub sorted: bool,
}

impl CrackEntry {
    /// First slot of the entry's piece when holes precede `pos`.
    fn prev_pos(&self) -> usize {
        self.pos - self.holes
    }
}

/// Cumulative and per-query counters for a single engine.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CrackingStats {
    pub queries_executed: u64,
    pub total_tuples_touched: u64,
    pub total_cracks_created: u64,
    pub total_query_time_ms: f64,

    pub last_tuples_touched: u64,
    pub last_cracks_created: u64,
    pub last_query_time_ms: f64,
    pub last_result_count: u64,
}

impl CrackingStats {
    /// Zero every counter.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Self-contained cracking engine for one i32 column.
///
/// The engine exclusively owns its heap state and is movable but not
/// copyable. It is not thread-safe; callers serialize access.
pub struct CrackingEngine {
    /// Column values; `data.len()` is the current logical size.
    data: Vec<i32>,
    /// Ordered crack index: value -> partition record.
    crack_index: BTreeMap<i32, CrackEntry>,
    /// Queued inserts/removes as value -> multiplicity.
    pending_inserts: BTreeMap<i32, u32>,
    pending_deletes: BTreeMap<i32, u32>,
    stats: CrackingStats,
}

impl CrackingEngine {
    /// Build an engine from a copy of `initial` with default insert headroom.
    pub fn new(initial: &[i32]) -> Self {
        let headroom = (initial.len() / 10).max(1000);
        Self::with_extra_capacity(initial, headroom)
    }

    /// Build an engine reserving exactly `extra_capacity` slots for inserts.
    ///
    /// The reservation is a hint: absorbing more inserts than reserved grows
    /// the buffer rather than dropping data.
    pub fn with_extra_capacity(initial: &[i32], extra_capacity: usize) -> Self {
        let mut data = Vec::with_capacity(initial.len() + extra_capacity);
        data.extend_from_slice(initial);
        Self {
            data,
            crack_index: BTreeMap::new(),
            pending_inserts: BTreeMap::new(),
            pending_deletes: BTreeMap::new(),
            stats: CrackingStats::default(),
        }
    }

    /// Count values `x` with `low <= x < high`, cracking along the way.
    ///
    /// Pending updates whose value falls in `[low, high)` are absorbed first,
    /// so the result reflects every queued change the range covers. An empty
    /// range (`low >= high`) returns 0 and leaves the crack index untouched.
    pub fn range_query(&mut self, low: i32, high: i32) -> usize {
        let start = Instant::now();

        self.stats.last_tuples_touched = 0;
        self.stats.last_cracks_created = 0;
        self.stats.last_result_count = 0;

        let result = if low < high {
            self.merge_pending_updates(low, high);
            self.crack(low, high)
        } else {
            0
        };

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.stats.last_query_time_ms = elapsed_ms;
        self.stats.last_result_count = result as u64;

        self.stats.queries_executed += 1;
        self.stats.total_tuples_touched += self.stats.last_tuples_touched;
        self.stats.total_cracks_created += self.stats.last_cracks_created;
        self.stats.total_query_time_ms += elapsed_ms;

        result
    }

    /// Queue an insert; a pending remove of the same value cancels instead.
    pub fn insert(&mut self, value: i32) {
        if let Some(count) = self.pending_deletes.get_mut(&value) {
            *count -= 1;
            if *count == 0 {
                self.pending_deletes.remove(&value);
            }
        } else {
            *self.pending_inserts.entry(value).or_insert(0) += 1;
        }
    }

    /// Queue a remove; a pending insert of the same value cancels instead.
    pub fn remove(&mut self, value: i32) {
        if let Some(count) = self.pending_inserts.get_mut(&value) {
            *count -= 1;
            if *count == 0 {
                self.pending_inserts.remove(&value);
            }
        } else {
            *self.pending_deletes.entry(value).or_insert(0) += 1;
        }
    }

    /// Current number of column values (absorbed updates included).
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Number of crack points currently recorded.
    pub fn crack_count(&self) -> usize {
        self.crack_index.len()
    }

    /// Queued inserts not yet absorbed, counted with multiplicity.
    pub fn pending_inserts(&self) -> usize {
        self.pending_inserts.values().map(|&c| c as usize).sum()
    }

    /// Queued removes not yet absorbed, counted with multiplicity.
    pub fn pending_deletes(&self) -> usize {
        self.pending_deletes.values().map(|&c| c as usize).sum()
    }

    pub fn stats(&self) -> CrackingStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    /// Locate the piece `[L, R)` that would hold `v`, per the crack index.
    ///
    /// When `v` equals an existing crack key the right-hand piece is selected
    /// (its lower key is `v`) and `exact` is true: the recorded position
    /// already partitions the array around `v`.
    fn find_piece(&self, v: i32) -> (usize, usize, bool) {
        let mut exact = false;
        let left = match self.crack_index.range(..=v).next_back() {
            Some((key, entry)) => {
                exact = *key == v;
                entry.pos
            }
            None => 0,
        };
        let right = self
            .crack_index
            .range((Bound::Excluded(v), Bound::Unbounded))
            .next()
            .map(|(_, entry)| entry.prev_pos())
            .unwrap_or(self.data.len());
        (left, right, exact)
    }

    /// Move values `< v` in `[l, r)` to the front; return the split position.
    fn partition(&mut self, v: i32, l: usize, r: usize) -> usize {
        let mut split = l;
        for cur in l..r {
            if self.data[cur] < v {
                self.data.swap(cur, split);
                split += 1;
            }
        }
        split
    }

    /// Single-pass three-way split of `[l, r)` into `< a`, `[a, b)`, `>= b`.
    ///
    /// Returns `(i1, i2)` with `l <= i1 <= i2 <= r`: the middle class spans
    /// `[i1, i2)`. At most two swaps per inspected element.
    fn split_ab(&mut self, l: usize, r: usize, a: i32, b: i32) -> (usize, usize) {
        let mut i1 = l;
        let mut i2 = l;
        let mut cur = l;
        let mut end = r;

        while cur < end {
            let x = self.data[cur];
            if x < a {
                self.data.swap(cur, i1);
                if i1 != i2 {
                    self.data.swap(cur, i2);
                }
                i1 += 1;
                i2 += 1;
                cur += 1;
            } else if x < b {
                self.data.swap(cur, i2);
                i2 += 1;
                cur += 1;
            } else {
                end -= 1;
                self.data.swap(cur, end);
            }
        }

        (i1, i2)
    }

    /// Record a crack point at `value`/`pos` unless it would be redundant.
    ///
    /// Boundary positions are never recorded, and neither is a position an
    /// adjacent key already carries: each piece keeps at most one crack key.
    fn add_crack(&mut self, value: i32, pos: usize) {
        if pos == 0 || pos >= self.data.len() {
            return;
        }
        if let Some((_, entry)) = self.crack_index.range(value..).next() {
            if entry.pos == pos {
                return;
            }
        }
        if let Some((_, entry)) = self
            .crack_index
            .range((Bound::Excluded(value), Bound::Unbounded))
            .next()
        {
            if entry.prev_pos() == pos {
                return;
            }
        }
        if let Some((_, entry)) = self.crack_index.range(..value).next_back() {
            if entry.pos == pos {
                return;
            }
        }
        if let Some(existing) = self.crack_index.get(&value) {
            debug_assert_eq!(
                existing.pos, pos,
                "conflicting position for crack key {value}"
            );
            return;
        }

        self.stats.last_cracks_created += 1;
        self.crack_index.insert(
            value,
            CrackEntry {
                pos,
                holes: 0,
                sorted: false,
            },
        );
    }

    /// Partition around both bounds and count values in `[a, b)`.
    ///
    /// A bound that equals an existing crack key reuses the recorded position
    /// without scanning anything, so repeating a query touches no tuples.
    fn crack(&mut self, a: i32, b: i32) -> usize {
        let (l1, r1, exact_a) = self.find_piece(a);
        let (l2, r2, exact_b) = self.find_piece(b);

        let (i1, i2) = if exact_a && exact_b {
            (l1, l2)
        } else if exact_a {
            self.stats.last_tuples_touched += (r2 - l2) as u64;
            (l1, self.partition(b, l2, r2))
        } else if exact_b {
            self.stats.last_tuples_touched += (r1 - l1) as u64;
            (self.partition(a, l1, r1), l2)
        } else if l1 == l2 {
            // Both bounds fall inside one piece: one pass instead of two.
            debug_assert_eq!(r1, r2);
            self.stats.last_tuples_touched += (r1 - l1) as u64;
            self.split_ab(l1, r1, a, b)
        } else {
            self.stats.last_tuples_touched += (r1 - l1) as u64 + (r2 - l2) as u64;
            (self.partition(a, l1, r1), self.partition(b, l2, r2))
        };

        self.add_crack(a, i1);
        self.add_crack(b, i2);

        i2 - i1
    }

    /// Absorb queued updates whose value lies in `[low, high)`.
    ///
    /// Inserts append at the tail; crack entries keyed above the inserted
    /// value are dropped because the append lands in their pieces' range.
    /// Removes swap with the last element, which breaks piece boundaries
    /// arbitrarily, so they clear the whole index.
    fn merge_pending_updates(&mut self, low: i32, high: i32) {
        if !self.pending_inserts.is_empty() {
            let inserts: Vec<(i32, u32)> = self
                .pending_inserts
                .range(low..high)
                .map(|(v, c)| (*v, *c))
                .collect();
            for (value, count) in inserts {
                self.pending_inserts.remove(&value);
                for _ in 0..count {
                    self.data.push(value);
                }
                self.invalidate_cracks_above(value);
            }
        }

        if !self.pending_deletes.is_empty() {
            let deletes: Vec<(i32, u32)> = self
                .pending_deletes
                .range(low..high)
                .map(|(v, c)| (*v, *c))
                .collect();
            for (value, count) in deletes {
                self.pending_deletes.remove(&value);
                for _ in 0..count {
                    if let Some(idx) = self.data.iter().position(|&x| x == value) {
                        self.data.swap_remove(idx);
                        self.crack_index.clear();
                    }
                }
            }
        }
    }

    /// Drop crack entries whose key exceeds a value just appended at the
    /// tail; entries at or below the value still partition correctly.
    fn invalidate_cracks_above(&mut self, value: i32) {
        if value == i32::MAX {
            return;
        }
        self.crack_index.split_off(&(value + 1));
    }
}

/// Reference count of values in `[low, high)` by full scan.
pub fn naive_range_count(data: &[i32], low: i32, high: i32) -> usize {
    data.iter().filter(|&&x| x >= low && x < high).count()
}
