//! The dynamic Vamana index (§4.8): a static graph/dataset pair plus an
//! [`IdTranslator`] so points can be added and removed by caller-chosen
//! external IDs. Deletions are tombstones filtered out of traversal and
//! search results until [`DynamicVamanaIndex::consolidate`] rewrites the
//! graph to route around them; [`DynamicVamanaIndex::compact`] then
//! reclaims their slots.

use vamana_core::dataset::{ContiguousDataset, Dataset, MutableDataset};
use vamana_core::distance::{AnyDistance, DistanceKind};
use vamana_core::element::Element;
use vamana_core::error::{CoreError, CoreResult};
use vamana_core::graph::{FixedDegreeGraph, Graph};
use vamana_core::ids::{ExternalId, IdTranslator, InternalId};
use vamana_core::medoid::approximate_medoid;
use vamana_core::search_buffer::SearchBuffer;
use vamana_core::threadpool::ThreadPoolHandle;
use vamana_core::CancelPredicate;

use crate::builder;
use crate::static_index::VamanaParams;

/// A dynamic Vamana index. Internal slot `i` may be empty, live, or
/// tombstoned; `graph` and `dataset` are always sized to the translator's
/// capacity so that every live internal ID is addressable.
pub struct DynamicVamanaIndex<T: Element> {
    dataset: ContiguousDataset<T>,
    graph: FixedDegreeGraph,
    translator: IdTranslator,
    entry_point: InternalId,
    distance_kind: DistanceKind,
    params: VamanaParams,
    thread_pool: ThreadPoolHandle,
}

impl<T: Element> DynamicVamanaIndex<T> {
    /// Builds a dynamic index from an initial batch, matching external
    /// IDs 1:1 with rows of `dataset`.
    ///
    /// # Errors
    /// [`CoreError::InvalidState`] if `dataset` is empty, or
    /// [`CoreError::DimensionMismatch`] if `external_ids.len() !=
    /// dataset.size()`.
    pub fn build(
        dataset: ContiguousDataset<T>,
        external_ids: &[ExternalId],
        distance_kind: DistanceKind,
        params: VamanaParams,
        thread_pool: ThreadPoolHandle,
        seed: u64,
    ) -> CoreResult<Self> {
        let size = dataset.size();
        if size == 0 {
            return Err(CoreError::invalid_state("cannot build a dynamic index over an empty dataset"));
        }
        if external_ids.len() != size {
            return Err(CoreError::DimensionMismatch {
                expected: size,
                found: external_ids.len(),
            });
        }
        let mut translator = IdTranslator::new();
        for &ext in external_ids {
            translator.allocate(ext, false)?;
        }
        let entry_point = approximate_medoid(&dataset, size.min(4096), seed) as InternalId;
        let mut graph = FixedDegreeGraph::new(size, params.graph_max_degree);
        let vector_at = |i: usize| vamana_core::element::to_f32_vec(dataset.get_datum(i));
        builder::build_graph(
            size,
            &vector_at,
            distance_kind,
            &mut graph,
            &params.build_params(),
            &thread_pool,
            entry_point as usize,
            seed,
        )?;
        Ok(Self {
            dataset,
            graph,
            translator,
            entry_point,
            distance_kind,
            params,
            thread_pool,
        })
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.translator.live_count()
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dataset.dimensions()
    }

    #[must_use]
    pub fn params(&self) -> &VamanaParams {
        &self.params
    }

    fn vector_at_internal(&self, i: InternalId) -> std::borrow::Cow<'_, [f32]> {
        std::borrow::Cow::Owned(vamana_core::element::to_f32_vec(self.dataset.get_datum(i as usize)))
    }

    /// Adds new points with caller-supplied external IDs. Each new row is
    /// inserted into the graph via its own greedy-search candidate pool
    /// and α-pruned neighbor set, the same as one node of the static
    /// builder's sweep, then gets reverse edges added at its neighbors.
    ///
    /// # Errors
    /// [`CoreError::Other`] if any `external_ids[i]` is already live, or
    /// [`CoreError::DimensionMismatch`] if `vectors.len() !=
    /// external_ids.len()`.
    pub fn add_points(&mut self, vectors: &[Vec<T>], external_ids: &[ExternalId], reuse_empty: bool) -> CoreResult<()> {
        if vectors.len() != external_ids.len() {
            return Err(CoreError::DimensionMismatch {
                expected: external_ids.len(),
                found: vectors.len(),
            });
        }
        for (vector, &external_id) in vectors.iter().zip(external_ids) {
            let internal_id = self.translator.allocate(external_id, reuse_empty)?;
            if internal_id as usize == self.dataset.size() {
                self.dataset.push(vector)?;
            } else {
                self.dataset.set_datum(internal_id as usize, vector)?;
            }
            if internal_id as usize >= self.graph.num_nodes() {
                self.graph = grow_graph(&self.graph, internal_id as usize + 1);
            }
            self.insert_into_graph(internal_id, vector);
        }
        Ok(())
    }

    fn insert_into_graph(&mut self, internal_id: InternalId, vector: &[T]) {
        let kind = self.distance_kind;
        let target_f32 = vamana_core::element::to_f32_vec(vector);
        let params = self.params.build_params();
        let graph_ref: &FixedDegreeGraph = &self.graph;
        let vector_at = |i: usize| vamana_core::element::to_f32_vec(self.dataset.get_datum(i));
        let candidates = gather_live_candidates(
            graph_ref,
            &vector_at,
            &self.translator,
            kind,
            self.entry_point as usize,
            &target_f32,
            params.construction_search_window_size,
            params.max_candidate_pool_size,
        );
        let pairwise = |a: u32, b: u32| builder::raw_distance(kind, &vector_at(a as usize), &vector_at(b as usize));
        let accepted = builder::alpha_prune(&candidates, params.alpha, params.graph_max_degree, &pairwise);
        self.graph.replace_node(internal_id as usize, &accepted);
        for &c in &accepted {
            self.graph.add_edge(c as usize, internal_id);
        }
    }

    /// Tombstones `external_ids`; they remain invisible to searches and
    /// traversal immediately, but their slots are not reusable until
    /// [`DynamicVamanaIndex::consolidate`] runs.
    ///
    /// # Errors
    /// [`CoreError::NotFound`] if any external id is not currently live.
    pub fn delete_entries(&mut self, external_ids: &[ExternalId]) -> CoreResult<()> {
        for &ext in external_ids {
            self.translator.tombstone(ext)?;
        }
        Ok(())
    }

    /// Rewrites every remaining live node's adjacency list to route
    /// around tombstoned neighbors (replacing each tombstoned neighbor
    /// with *its* live out-neighbors, per §4.8), then frees the
    /// tombstoned slots for reuse.
    pub fn consolidate(&mut self) {
        let live: Vec<InternalId> = (0..self.graph.num_nodes() as InternalId)
            .filter(|&i| self.translator.get_external(i).is_some())
            .collect();
        let max_degree = self.params.graph_max_degree;
        let graph_ref: &FixedDegreeGraph = &self.graph;
        let translator_ref = &self.translator;
        let rewritten: Vec<parking_lot::Mutex<Vec<u32>>> =
            (0..live.len()).map(|_| parking_lot::Mutex::new(Vec::new())).collect();
        self.thread_pool.parallel_for(live.len(), vamana_core::threadpool::Partition::DynamicBlockSize(64), |idx| {
            let node = live[idx];
            let mut replacement = Vec::new();
            for &neighbor in graph_ref.get_node(node as usize) {
                if translator_ref.is_tombstoned(neighbor) {
                    replacement.extend(graph_ref.get_node(neighbor as usize).iter().copied());
                } else {
                    replacement.push(neighbor);
                }
            }
            replacement.retain(|&n| n != node && !translator_ref.is_tombstoned(n));
            replacement.sort_unstable();
            replacement.dedup();
            replacement.truncate(max_degree);
            *rewritten[idx].lock() = replacement;
        });
        for (idx, &node) in live.iter().enumerate() {
            let replacement = rewritten[idx].lock().clone();
            self.graph.replace_node(node as usize, &replacement);
        }
        self.translator.consolidate();
    }

    /// Physically reclaims tombstoned slots by compacting live data into
    /// a contiguous prefix, remapping the graph and entry point
    /// accordingly. Should run after [`DynamicVamanaIndex::consolidate`]
    /// so there are no outstanding tombstones to remap.
    pub fn compact(&mut self) {
        let plan = self.translator.compaction_plan();
        let new_size = plan.len();

        let mut new_dataset: ContiguousDataset<T> = ContiguousDataset::new(self.dataset.dimensions());
        let mut ordered: Vec<(InternalId, InternalId)> = plan.iter().map(|(&o, &n)| (o, n)).collect();
        ordered.sort_by_key(|&(_, new)| new);
        for &(old, _) in &ordered {
            new_dataset.push(self.dataset.get_datum(old as usize)).expect("dimensions already validated");
        }

        let mut new_graph = FixedDegreeGraph::new(new_size, self.params.graph_max_degree);
        for &(old, new) in &ordered {
            let remapped: Vec<u32> = self
                .graph
                .get_node(old as usize)
                .iter()
                .filter_map(|n| plan.get(n).copied())
                .collect();
            new_graph.replace_node(new as usize, &remapped);
        }

        self.entry_point = *plan.get(&self.entry_point).unwrap_or(&0);
        self.dataset = new_dataset;
        self.graph = new_graph;
        self.translator.apply_compaction(&plan);
    }

    /// Searches for the `k` nearest live points, filtering out
    /// tombstoned internal IDs from both the traversal frontier and the
    /// returned results, and translating surviving hits back to external
    /// IDs.
    ///
    /// Traversal skips tombstoned neighbors entirely (§4.8): a deleted
    /// node is never expanded from and never enters the buffer, not just
    /// filtered out of the final top-k.
    #[must_use]
    pub fn search(&self, query: &[f32], k: usize, cancel: CancelPredicate<'_>) -> Vec<(ExternalId, f32)> {
        let distance = AnyDistance::new(self.distance_kind).fix_argument(query);
        let mut buffer = SearchBuffer::split(
            self.distance_kind,
            self.params.search_window_size,
            self.params.total_capacity,
            true,
        );

        buffer.push_back(self.entry_point, distance.compute(&self.vector_at_internal(self.entry_point)));
        buffer.sort();

        while !buffer.done() {
            if cancel() {
                break;
            }
            let Some(current) = buffer.next() else {
                break;
            };
            for &m in self.graph.get_node(current.id as usize) {
                if self.translator.is_tombstoned(m) || buffer.visited(m) {
                    continue;
                }
                let d = distance.compute(&self.vector_at_internal(m));
                buffer.insert(m, d);
            }
        }

        buffer
            .top_k(k)
            .iter()
            .filter_map(|e| self.translator.get_external(e.id).map(|ext| (ext, e.distance)))
            .collect()
    }
}

#[allow(clippy::too_many_arguments)]
fn gather_live_candidates(
    graph: &FixedDegreeGraph,
    vector_at: &dyn Fn(usize) -> Vec<f32>,
    translator: &IdTranslator,
    kind: DistanceKind,
    entry_point: usize,
    target: &[f32],
    window: usize,
    pool_size: usize,
) -> Vec<(u32, f32)> {
    let mut buffer = SearchBuffer::split(kind, window, pool_size.max(window), true);
    let d0 = builder::raw_distance(kind, target, &vector_at(entry_point));
    buffer.push_back(entry_point as u32, d0);
    buffer.sort();

    while !buffer.done() {
        let Some(current) = buffer.next() else {
            break;
        };
        for &m in graph.get_node(current.id as usize) {
            if translator.is_tombstoned(m) || buffer.visited(m) {
                continue;
            }
            let dm = builder::raw_distance(kind, target, &vector_at(m as usize));
            buffer.insert(m, dm);
        }
    }
    buffer.entries().iter().map(|e| (e.id, e.distance)).take(pool_size).collect()
}

fn grow_graph(old: &FixedDegreeGraph, new_size: usize) -> FixedDegreeGraph {
    let mut new_graph = FixedDegreeGraph::new(new_size, old.max_degree());
    for i in 0..old.num_nodes() {
        new_graph.replace_node(i, old.get_node(i));
    }
    new_graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use vamana_core::never_cancel;

    fn small_index() -> DynamicVamanaIndex<f32> {
        let mut dataset: ContiguousDataset<f32> = ContiguousDataset::new(1);
        for i in 0..20 {
            dataset.push(&[i as f32]).unwrap();
        }
        let ids: Vec<ExternalId> = (100..120).collect();
        let params = VamanaParams {
            graph_max_degree: 4,
            prune_to: 4,
            max_candidate_pool_size: 8,
            construction_search_window_size: 8,
            search_window_size: 8,
            total_capacity: 8,
            ..VamanaParams::default()
        };
        DynamicVamanaIndex::build(dataset, &ids, DistanceKind::L2, params, ThreadPoolHandle::sequential(), 5).unwrap()
    }

    #[test]
    fn search_returns_external_ids() {
        let index = small_index();
        let results = index.search(&[5.0], 1, &never_cancel);
        assert_eq!(results[0].0, 105);
    }

    #[test]
    fn deleted_entries_are_invisible_to_search() {
        let mut index = small_index();
        index.delete_entries(&[105]).unwrap();
        let results = index.search(&[5.0], 3, &never_cancel);
        assert!(!results.iter().any(|(ext, _)| *ext == 105));
    }

    #[test]
    fn consolidate_and_compact_shrink_live_count() {
        let mut index = small_index();
        index.delete_entries(&[100, 101]).unwrap();
        assert_eq!(index.live_count(), 18);
        index.consolidate();
        index.compact();
        assert_eq!(index.live_count(), 18);
        let results = index.search(&[5.0], 1, &never_cancel);
        assert_eq!(results[0].0, 105);
    }

    #[test]
    fn add_points_makes_new_external_id_searchable() {
        let mut index = small_index();
        index.add_points(&[vec![50.0]], &[500], false).unwrap();
        let results = index.search(&[50.0], 1, &never_cancel);
        assert_eq!(results[0].0, 500);
    }
}
