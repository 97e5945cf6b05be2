//! Single-query Vamana graph traversal (§4.3): seed the buffer from the
//! entry points, then repeatedly expand the closest unvisited entry's
//! out-neighbors until the search window is exhausted or the caller
//! cancels.

use std::borrow::Cow;

use vamana_core::{AnyDistance, CancelPredicate, Graph, SearchBuffer};

/// Controls the prefetch bookkeeping described in §4.3 step 3c. Real
/// hardware prefetching is only available behind `unsafe` intrinsics on
/// x86_64/aarch64; elsewhere this degrades to a no-op, matching the
/// scalar fallback pattern used throughout `simd.rs`.
#[derive(Debug, Clone, Copy)]
pub struct PrefetchConfig {
    pub step: usize,
    pub offset: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            step: 4,
            offset: 2,
        }
    }
}

#[cfg(target_arch = "x86_64")]
#[inline]
fn prefetch_hint(ptr: *const u8) {
    unsafe {
        std::arch::x86_64::_mm_prefetch::<{ std::arch::x86_64::_MM_HINT_T0 }>(ptr.cast());
    }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline]
fn prefetch_hint(_ptr: *const u8) {}

/// Runs one greedy search. `buffer` should already be configured with a
/// visited set enabled so that "not already visited/inserted" dedup
/// (§4.3 step 3b) is O(1); the buffer is cleared at the start.
pub fn greedy_search(
    graph: &dyn Graph,
    vector_at: &(dyn Fn(u32) -> Cow<'_, [f32]> + Sync),
    distance: &AnyDistance,
    buffer: &mut SearchBuffer,
    entry_points: &[u32],
    prefetch: PrefetchConfig,
    cancel: CancelPredicate<'_>,
) {
    buffer.clear();
    for &e in entry_points {
        let v = vector_at(e);
        let d = distance.compute(&v);
        buffer.push_back(e, d);
    }
    buffer.sort();

    while !buffer.done() {
        if cancel() {
            return;
        }
        let Some(current) = buffer.next() else {
            break;
        };
        let neighbors = graph.get_node(current.id as usize);
        for (idx, &m) in neighbors.iter().enumerate() {
            if idx + prefetch.offset < neighbors.len() && idx % prefetch.step == 0 {
                let lookahead = neighbors[idx + prefetch.offset];
                let hint = vector_at(lookahead);
                prefetch_hint(hint.as_ptr().cast());
            }
            if buffer.visited(m) {
                continue;
            }
            let dv = vector_at(m);
            let d = distance.compute(&dv);
            buffer.insert(m, d);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vamana_core::dataset::{ContiguousDataset, Dataset};
    use vamana_core::distance::DistanceKind;
    use vamana_core::graph::{FixedDegreeGraph, Graph as _};
    use vamana_core::never_cancel;

    fn line_graph() -> (FixedDegreeGraph, ContiguousDataset<f32>) {
        // 5 nodes on a line: 0 - 1 - 2 - 3 - 4, each pointing to its
        // right neighbor (and back), vectors at positions 0..5.
        let mut g = FixedDegreeGraph::new(5, 2);
        for i in 0..4u32 {
            g.add_edge(i as usize, i + 1);
            g.add_edge((i + 1) as usize, i);
        }
        let mut d: ContiguousDataset<f32> = ContiguousDataset::new(1);
        for i in 0..5 {
            d.push(&[i as f32]).unwrap();
        }
        (g, d)
    }

    #[test]
    fn finds_exact_nearest_on_a_line() {
        let (g, d) = line_graph();
        let distance = AnyDistance::new(DistanceKind::L2).fix_argument(&[3.2]);
        let mut buffer = SearchBuffer::split(DistanceKind::L2, 3, 3, true);
        let vector_at = |i: u32| std::borrow::Cow::Borrowed(d.get_datum(i as usize));
        greedy_search(&g, &vector_at, &distance, &mut buffer, &[0], PrefetchConfig::default(), &never_cancel);
        let top = buffer.top_k(1);
        assert_eq!(top[0].id, 3);
    }

    #[test]
    fn cancellation_stops_expansion_early() {
        let (g, d) = line_graph();
        let distance = AnyDistance::new(DistanceKind::L2).fix_argument(&[4.0]);
        let mut buffer = SearchBuffer::split(DistanceKind::L2, 5, 5, true);
        let vector_at = |i: u32| std::borrow::Cow::Borrowed(d.get_datum(i as usize));
        let cancel_now = || true;
        greedy_search(&g, &vector_at, &distance, &mut buffer, &[0], PrefetchConfig::default(), &cancel_now);
        // Only the entry point was ever visited; buffer holds just it.
        assert_eq!(buffer.len(), 1);
    }
}
