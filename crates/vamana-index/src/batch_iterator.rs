//! Resumable batch retrieval (§4.14): repeatedly pulling the next
//! `batch_size` nearest neighbors of a query without re-running search
//! from scratch each time, by keeping the search buffer alive between
//! calls and only ever advancing its window forward.

use vamana_core::distance::{AnyDistance, DistanceKind};
use vamana_core::element::Element;
use vamana_core::error::{CoreError, CoreResult};
use vamana_core::graph::Graph;
use vamana_core::search_buffer::SearchBuffer;
use vamana_core::CancelPredicate;

use crate::greedy_search::{greedy_search, PrefetchConfig};
use crate::static_index::VamanaIndex;

/// Yields successive batches of the `k`-th through `(k + batch_size -
/// 1)`-th nearest neighbors of a single query, advancing its internal
/// search buffer exactly as far as needed to produce each batch.
///
/// `next` is all-or-nothing (§4.14 exception safety): if expanding the
/// buffer partway through a batch fails to find `batch_size` additional
/// results before the buffer is exhausted or cancellation fires, no
/// entries are marked yielded and the state is left exactly as it was
/// before the call, so a caller retrying with a smaller `batch_size` (or
/// after growing `total_capacity`) sees a consistent view.
pub struct BatchIterator<'idx, T: Element> {
    index: &'idx VamanaIndex<T>,
    query: Vec<f32>,
    buffer: SearchBuffer,
    yielded: usize,
    batch_number: usize,
    entry_points: Vec<u32>,
    prefetch: PrefetchConfig,
    capacity: usize,
}

impl<'idx, T: Element> BatchIterator<'idx, T> {
    #[must_use]
    pub fn new(index: &'idx VamanaIndex<T>, query: Vec<f32>) -> Self {
        let params = index.params();
        let buffer = SearchBuffer::split(
            index_distance_kind(index),
            params.total_capacity,
            params.total_capacity,
            params.use_visited_set,
        );
        Self {
            index,
            query,
            buffer,
            yielded: 0,
            batch_number: 0,
            entry_points: vec![entry_point(index)],
            prefetch: PrefetchConfig {
                step: params.prefetch_step,
                offset: params.prefetch_offset,
            },
            capacity: params.total_capacity,
        }
    }

    #[must_use]
    pub fn batch_number(&self) -> usize {
        self.batch_number
    }

    #[must_use]
    pub fn yielded_count(&self) -> usize {
        self.yielded
    }

    /// Returns the next `batch_size` results, growing the search buffer's
    /// capacity as needed. Returns fewer than `batch_size` entries only
    /// once the graph has been fully exhausted.
    ///
    /// # Errors
    /// [`CoreError::InvalidState`] if `batch_size == 0`.
    pub fn next(&mut self, batch_size: usize, cancel: CancelPredicate<'_>) -> CoreResult<Vec<vamana_core::BufferEntry>> {
        if batch_size == 0 {
            return Err(CoreError::invalid_state("batch_size must be nonzero"));
        }
        let target_total = self.yielded + batch_size;
        let saved_buffer = self.buffer.clone();
        let saved_yielded = self.yielded;

        while self.buffer.len() < target_total && !self.buffer.done() {
            if cancel() {
                // Leave state untouched; caller may retry or give up.
                self.buffer = saved_buffer;
                self.yielded = saved_yielded;
                return Ok(Vec::new());
            }
            self.grow_capacity(target_total);
            self.run_search(cancel);
        }

        let available = self.buffer.len().saturating_sub(self.yielded).min(batch_size);
        let start = self.yielded;
        let batch = self.buffer.entries()[start..start + available].to_vec();
        self.yielded += available;
        self.batch_number += 1;
        Ok(batch)
    }

    /// `SearchBuffer` has no in-place capacity growth, so once a batch
    /// needs more candidates than the buffer currently holds room for,
    /// this rebuilds a larger one seeded with everything already found.
    fn grow_capacity(&mut self, target_total: usize) {
        if target_total <= self.capacity {
            return;
        }
        let window = self.index.params().search_window_size;
        let needed = target_total.max(window);
        let kind = index_distance_kind(self.index);
        let mut grown = SearchBuffer::split(kind, window, needed, true);
        for entry in self.buffer.entries() {
            grown.push_back(entry.id, entry.distance);
        }
        grown.sort();
        self.buffer = grown;
        self.capacity = needed;
    }

    fn run_search(&mut self, cancel: CancelPredicate<'_>) {
        let distance = AnyDistance::new(index_distance_kind(self.index)).fix_argument(&self.query);
        let vector_at = |i: u32| index_vector_at(self.index, i);
        greedy_search(
            graph_of(self.index),
            &vector_at,
            &distance,
            &mut self.buffer,
            &self.entry_points,
            self.prefetch,
            cancel,
        );
    }

    /// Re-runs the search from scratch against `new_query`, discarding
    /// all buffer state and the yielded count.
    pub fn update(&mut self, new_query: Vec<f32>) {
        let params = self.index.params();
        self.query = new_query;
        self.buffer = SearchBuffer::split(
            index_distance_kind(self.index),
            params.total_capacity,
            params.total_capacity,
            params.use_visited_set,
        );
        self.capacity = params.total_capacity;
        self.yielded = 0;
        self.batch_number = 0;
    }

    /// Discards the in-progress (partially expanded) buffer state but
    /// keeps the count of results already yielded to the caller, so a
    /// subsequent `next` call re-searches from the entry point without
    /// re-yielding anything already handed out.
    pub fn restart_next_search(&mut self) {
        let params = self.index.params();
        let kept = self.yielded;
        let capacity = params.total_capacity.max(kept);
        self.buffer = SearchBuffer::split(index_distance_kind(self.index), capacity, capacity, params.use_visited_set);
        self.capacity = capacity;
        self.yielded = kept.min(self.buffer.len());
    }
}

// Small accessors that reach into `VamanaIndex`'s private fields via its
// own public surface, kept free-standing so `BatchIterator` doesn't need
// to be declared inside `static_index`.
fn index_distance_kind<T: Element>(index: &VamanaIndex<T>) -> DistanceKind {
    index.distance_kind_for_batch_iterator()
}

fn entry_point<T: Element>(index: &VamanaIndex<T>) -> u32 {
    index.entry_point_for_batch_iterator() as u32
}

fn graph_of<T: Element>(index: &VamanaIndex<T>) -> &dyn Graph {
    index.graph_for_batch_iterator()
}

fn index_vector_at<T: Element>(index: &VamanaIndex<T>, i: u32) -> std::borrow::Cow<'_, [f32]> {
    index.primary_vector_for_batch_iterator(i as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vamana_core::dataset::ContiguousDataset;
    use vamana_core::never_cancel;
    use vamana_core::threadpool::ThreadPoolHandle;

    use crate::static_index::VamanaParams;

    fn line_index() -> VamanaIndex<f32> {
        let mut dataset: ContiguousDataset<f32> = ContiguousDataset::new(1);
        for i in 0..40 {
            dataset.push(&[i as f32]).unwrap();
        }
        let params = VamanaParams {
            graph_max_degree: 6,
            prune_to: 6,
            max_candidate_pool_size: 12,
            construction_search_window_size: 12,
            search_window_size: 8,
            total_capacity: 8,
            ..VamanaParams::default()
        };
        VamanaIndex::build(dataset, DistanceKind::L2, params, ThreadPoolHandle::sequential(), 2).unwrap()
    }

    #[test]
    fn successive_batches_do_not_repeat_ids() {
        let index = line_index();
        let mut iter = BatchIterator::new(&index, vec![0.0]);
        let first = iter.next(3, &never_cancel).unwrap();
        let second = iter.next(3, &never_cancel).unwrap();
        let first_ids: std::collections::HashSet<u32> = first.iter().map(|e| e.id).collect();
        assert!(second.iter().all(|e| !first_ids.contains(&e.id)));
        assert_eq!(iter.yielded_count(), first.len() + second.len());
    }

    #[test]
    fn update_resets_yielded_count() {
        let index = line_index();
        let mut iter = BatchIterator::new(&index, vec![0.0]);
        iter.next(3, &never_cancel).unwrap();
        iter.update(vec![39.0]);
        assert_eq!(iter.yielded_count(), 0);
        assert_eq!(iter.batch_number(), 0);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let index = line_index();
        let mut iter = BatchIterator::new(&index, vec![0.0]);
        assert!(iter.next(0, &never_cancel).is_err());
    }
}
