//! Bounded priority structure used by both Vamana greedy search and IVF
//! leaf scanning (§4.2). Maintains up to `total_capacity` entries in
//! ascending-by-comparator order; the split-buffer mode (`total_capacity >
//! search_window_size`) lets reranking replace a compressed distance with a
//! refined one without shrinking the candidate pool.

use std::collections::HashSet;

use crate::distance::DistanceKind;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferEntry {
    pub id: u32,
    pub distance: f32,
    pub visited: bool,
}

/// A bounded, sorted candidate buffer.
#[derive(Debug, Clone)]
pub struct SearchBuffer {
    kind: DistanceKind,
    entries: Vec<BufferEntry>,
    search_window_size: usize,
    total_capacity: usize,
    visited_ids: Option<HashSet<u32>>,
}

impl SearchBuffer {
    /// Creates a buffer with `search_window_size == total_capacity`
    /// (the common, non-split case).
    #[must_use]
    pub fn new(kind: DistanceKind, search_window_size: usize) -> Self {
        Self::split(kind, search_window_size, search_window_size, false)
    }

    /// Creates a split buffer: `total_capacity` entries are retained even
    /// though only the first `search_window_size` govern termination.
    ///
    /// # Panics
    /// Panics if `total_capacity < search_window_size`.
    #[must_use]
    pub fn split(
        kind: DistanceKind,
        search_window_size: usize,
        total_capacity: usize,
        with_visited_set: bool,
    ) -> Self {
        assert!(total_capacity >= search_window_size);
        Self {
            kind,
            entries: Vec::with_capacity(total_capacity),
            search_window_size,
            total_capacity,
            visited_ids: with_visited_set.then(HashSet::new),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn is_split(&self) -> bool {
        self.total_capacity > self.search_window_size
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        if let Some(set) = &mut self.visited_ids {
            set.clear();
        }
    }

    #[must_use]
    pub fn visited(&self, id: u32) -> bool {
        self.visited_ids
            .as_ref()
            .map(|s| s.contains(&id))
            .unwrap_or(false)
    }

    /// Appends an entry unconditionally (used while seeding entry points,
    /// before the buffer has been sorted for the first time).
    pub fn push_back(&mut self, id: u32, distance: f32) {
        self.entries.push(BufferEntry {
            id,
            distance,
            visited: false,
        });
        if let Some(set) = &mut self.visited_ids {
            set.insert(id);
        }
    }

    /// Sorts entries by the configured comparator.
    pub fn sort(&mut self) {
        let kind = self.kind;
        self.entries
            .sort_by(|a, b| kind.compare(a.distance, b.distance));
    }

    /// Inserts a candidate in sorted position. A no-op if the buffer is
    /// already at `total_capacity` and the candidate is no better than the
    /// current worst entry; otherwise evicts the worst entry to make room.
    pub fn insert(&mut self, id: u32, distance: f32) {
        if let Some(set) = &self.visited_ids {
            if set.contains(&id) {
                return;
            }
        }
        let pos = self
            .entries
            .partition_point(|e| self.kind.compare(e.distance, distance) != std::cmp::Ordering::Greater);
        if self.entries.len() >= self.total_capacity {
            if pos >= self.total_capacity {
                return; // worse than everything already kept
            }
            self.entries.pop();
        }
        self.entries.insert(
            pos,
            BufferEntry {
                id,
                distance,
                visited: false,
            },
        );
        if let Some(set) = &mut self.visited_ids {
            set.insert(id);
        }
    }

    /// Returns the next unvisited entry within the search window, marking
    /// it visited, or `None` if none remains.
    pub fn next(&mut self) -> Option<BufferEntry> {
        let window = self.search_window_size.min(self.entries.len());
        for entry in &mut self.entries[..window] {
            if !entry.visited {
                entry.visited = true;
                return Some(*entry);
            }
        }
        None
    }

    /// `true` once no unvisited entry remains within the first
    /// `search_window_size` positions.
    #[must_use]
    pub fn done(&self) -> bool {
        let window = self.search_window_size.min(self.entries.len());
        self.entries[..window].iter().all(|e| e.visited)
    }

    /// The first `k` entries, in ascending-by-comparator order.
    #[must_use]
    pub fn top_k(&self, k: usize) -> &[BufferEntry] {
        &self.entries[..k.min(self.entries.len())]
    }

    #[must_use]
    pub fn entries(&self) -> &[BufferEntry] {
        &self.entries
    }

    /// Replaces the distance of an existing entry (used during reranking in
    /// a split buffer) and re-sorts.
    pub fn rescore(&mut self, id: u32, new_distance: f32) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.distance = new_distance;
        }
        self.sort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_sorted_order() {
        let mut b = SearchBuffer::new(DistanceKind::L2, 10);
        for (id, d) in [(0u32, 3.0f32), (1, 1.0), (2, 2.0)] {
            b.insert(id, d);
        }
        let ids: Vec<u32> = b.top_k(3).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 0]);
    }

    #[test]
    fn insert_evicts_worst_when_full() {
        let mut b = SearchBuffer::new(DistanceKind::L2, 2);
        b.insert(0, 5.0);
        b.insert(1, 3.0);
        b.insert(2, 1.0); // better than both; should evict id 0
        assert_eq!(b.len(), 2);
        let ids: Vec<u32> = b.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn insert_of_worse_entry_when_full_is_noop() {
        let mut b = SearchBuffer::new(DistanceKind::L2, 1);
        b.insert(0, 1.0);
        b.insert(1, 5.0);
        assert_eq!(b.len(), 1);
        assert_eq!(b.entries()[0].id, 0);
    }

    #[test]
    fn next_marks_visited_and_respects_window() {
        let mut b = SearchBuffer::split(DistanceKind::L2, 1, 3, false);
        b.insert(0, 1.0);
        b.insert(1, 2.0);
        b.insert(2, 3.0);
        let first = b.next().unwrap();
        assert_eq!(first.id, 0);
        // window size 1: only the first position governs `done`.
        assert!(b.done());
        assert!(b.next().is_none());
    }

    #[test]
    fn visited_set_rejects_duplicate_insert() {
        let mut b = SearchBuffer::split(DistanceKind::L2, 5, 5, true);
        b.insert(1, 1.0);
        b.insert(1, 0.5);
        assert_eq!(b.len(), 1);
        assert!(b.visited(1));
    }

    #[test]
    fn split_buffer_keeps_more_than_window() {
        let mut b = SearchBuffer::split(DistanceKind::L2, 2, 5, false);
        for (id, d) in [(0u32, 1.0f32), (1, 2.0), (2, 3.0), (3, 4.0), (4, 5.0)] {
            b.insert(id, d);
        }
        assert_eq!(b.len(), 5);
        assert!(b.is_split());
    }
}
