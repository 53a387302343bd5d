//! Tandem-repeat candidate detection over a suffix array
//!
//! The detector sorts the cyclic shifts of a sequence window by their first
//! `h` characters, doubling `h` at each promotion step, and at every level
//! walks the sorted order looking for runs of shifts at distances in
//! `[h, 2h)` that share their sort class. Such runs are the tandem repeats
//! whose unit size lies in that band.

use std::collections::BTreeMap;

/// Equivalence classes of the cyclic shifts of a window, sorted by prefix
///
/// After construction the shifts are ordered by their first character;
/// each [`promote`](ShiftOrder::promote) call doubles the compared prefix
/// length using the class array of the previous level, the standard
/// doubling construction of a suffix array.
pub(crate) struct ShiftOrder {
    /// Shift start offsets, sorted by the current prefix length
    pub order: Vec<u32>,
    /// Sort class of each shift at the current prefix length
    pub classes: Vec<u32>,
    num_classes: usize,
    tmp_shifts: Vec<u32>,
    tmp_classes: Vec<u32>,
}

impl ShiftOrder {
    /// Sorts the shifts of `window` by their first character
    pub fn build(window: &[u8]) -> Self {
        let n = window.len();
        let mut order = vec![0u32; n];
        let mut classes = vec![0u32; n];

        let mut counter = [0usize; 256];
        for &symbol in window {
            counter[symbol as usize] += 1;
        }
        for symbol in 1..256 {
            counter[symbol] += counter[symbol - 1];
        }
        for offset in (0..n).rev() {
            let slot = &mut counter[window[offset] as usize];
            *slot -= 1;
            order[*slot] = offset as u32;
        }

        classes[order[0] as usize] = 0;
        let mut num_classes = 1usize;
        for i in 1..n {
            if window[order[i] as usize] != window[order[i - 1] as usize] {
                num_classes += 1;
            }
            classes[order[i] as usize] = (num_classes - 1) as u32;
        }

        Self {
            order,
            classes,
            num_classes,
            tmp_shifts: vec![0u32; n],
            tmp_classes: vec![0u32; n],
        }
    }

    /// Refines the order from prefix length `h` to `2h`
    pub fn promote(&mut self, h: usize) {
        let n = self.order.len();

        // shifts sorted by their second half are the current order moved
        // back by h positions, wrapping around the window
        for i in 0..n {
            let shifted = self.order[i] as usize;
            self.tmp_shifts[i] = if shifted >= h {
                (shifted - h) as u32
            } else {
                (shifted + n - h) as u32
            };
        }

        // stable counting sort by the class of the first half
        let counter = &mut self.tmp_classes;
        counter[..self.num_classes].fill(0);
        for i in 0..n {
            counter[self.classes[self.tmp_shifts[i] as usize] as usize] += 1;
        }
        for class in 1..self.num_classes {
            counter[class] += counter[class - 1];
        }
        for i in (0..n).rev() {
            let shifted = self.tmp_shifts[i];
            let slot = &mut counter[self.classes[shifted as usize] as usize];
            *slot -= 1;
            self.order[*slot as usize] = shifted;
        }

        // classes of the doubled prefix compare (first half, second half)
        let new_classes = &mut self.tmp_classes;
        new_classes[self.order[0] as usize] = 0;
        self.num_classes = 1;
        for i in 1..n {
            let curr = self.order[i] as usize;
            let prev = self.order[i - 1] as usize;
            if self.classes[curr] != self.classes[prev]
                || self.classes[(curr + h) % n] != self.classes[(prev + h) % n]
            {
                self.num_classes += 1;
            }
            new_classes[curr] = (self.num_classes - 1) as u32;
        }
        std::mem::swap(&mut self.classes, &mut self.tmp_classes);
    }
}

/// Candidate tandem repeats found at one promotion level
///
/// Maps the window offset of a repeat's first base to the final-base
/// offset of each candidate unit size starting there.
pub(crate) type CandidateMap = BTreeMap<usize, BTreeMap<usize, usize>>;

/// Collects the candidate repeats whose unit size lies in `[h, 2h)`
///
/// Walks the sorted shift order: two adjacent shifts in the same class at
/// distance `delta + h` with `delta < h`, whose offsets shifted by `delta`
/// still share a class, extend a repeat of unit `h + delta`. A run commits
/// when the adjacency breaks, or when `delta` changes while the run so far
/// was non-trivial; a degenerate run keeps its start and absorbs the new
/// `delta`. Repeats whose first base maps to chromosome position 1 or
/// before are discarded.
pub(crate) fn collect_candidates(
    begin: u64,
    h: usize,
    shifts: &ShiftOrder,
) -> CandidateMap {
    let n = shifts.order.len();
    let next_h = h.saturating_mul(2);

    let mut candidates = CandidateMap::new();
    let mut commit = |r_begin: usize, unit: usize, r_end: usize, candidates: &mut CandidateMap| {
        if r_begin < r_end && begin + r_begin as u64 > 1 {
            candidates.entry(r_begin).or_default().insert(unit, r_end);
        }
    };

    let mut r_begin = 0usize;
    let mut r_end = 0usize;
    let mut curr_delta = next_h;
    for i in 1..n {
        let curr = shifts.order[i] as usize;
        let prev = shifts.order[i - 1] as usize;

        let adjacent = shifts.classes[curr] == shifts.classes[prev]
            && curr >= h + prev
            && curr < next_h + prev
            && {
                let delta = curr - prev - h;
                curr + delta < n && shifts.classes[curr + delta] == shifts.classes[prev + delta]
            };

        if adjacent {
            let delta = curr - prev - h;
            // only a non-trivial run ends on a delta change
            if delta != curr_delta && curr_delta != next_h && r_begin < r_end {
                commit(r_begin, h + curr_delta, r_end, &mut candidates);
                r_begin = curr;
            }
            curr_delta = delta;
            r_end = curr;
        } else {
            commit(r_begin, h + curr_delta, r_end, &mut candidates);
            r_begin = curr;
            r_end = curr;
            curr_delta = next_h;
        }
    }
    commit(r_begin, h + curr_delta, r_end, &mut candidates);

    candidates
}
