//! The static IVF index (§4.12): two-stage search over a
//! [`DenseClusteredDataset`] — probe the nearest centroids, scan the
//! probed clusters (optionally across several inner threads), then merge
//! and return the top-k.

use serde::{Deserialize, Serialize};

use vamana_core::dataset::Dataset;
use vamana_core::distance::{AnyDistance, DistanceKind, DistanceOrder};
use vamana_core::element::Element;
use vamana_core::error::{CoreError, CoreResult};
use vamana_core::ids::InternalId;
use vamana_core::search_buffer::SearchBuffer;
use vamana_core::threadpool::{Partition, ThreadPoolHandle};
use vamana_core::CancelPredicate;

use crate::clustering::assign_all;
use crate::kmeans::{flat_kmeans, hierarchical_kmeans, sample_training_indices};
use crate::storage::DenseClusteredDataset;

/// Build- and search-time tunables (§4.10/§4.12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvfParams {
    pub num_centroids: usize,
    pub hierarchical: bool,
    /// Level-1 cluster count for hierarchical training; `0` means the
    /// spec's default of `ceil(sqrt(num_centroids))`.
    pub l1_clusters: usize,
    pub training_fraction: f32,
    pub num_iterations: usize,
    pub minibatch_size: usize,
    pub max_cluster_size: usize,
    pub n_probes: usize,
    pub k_reorder: usize,
    pub n_inner_threads: usize,
}

impl Default for IvfParams {
    fn default() -> Self {
        Self {
            num_centroids: 128,
            hierarchical: false,
            l1_clusters: 0,
            training_fraction: 0.1,
            num_iterations: 10,
            minibatch_size: 4096,
            max_cluster_size: usize::MAX,
            n_probes: 16,
            k_reorder: 4,
            n_inner_threads: 1,
        }
    }
}

impl IvfParams {
    fn l1(&self) -> usize {
        if self.l1_clusters > 0 {
            self.l1_clusters
        } else {
            (self.num_centroids as f64).sqrt().ceil() as usize
        }
    }
}

/// A built, immutable two-stage IVF index.
pub struct IvfIndex<T: Element> {
    storage: DenseClusteredDataset<T>,
    distance_kind: DistanceKind,
    params: IvfParams,
    thread_pool: ThreadPoolHandle,
}

impl<T: Element> IvfIndex<T> {
    /// Trains centroids (flat or hierarchical per `params.hierarchical`),
    /// assigns every row to its nearest centroid, and materializes the
    /// result as a [`DenseClusteredDataset`].
    ///
    /// # Errors
    /// [`CoreError::InvalidState`] if `dataset` is empty.
    pub fn build<D: Dataset<T>>(
        dataset: &D,
        distance_kind: DistanceKind,
        params: IvfParams,
        thread_pool: ThreadPoolHandle,
        seed: u64,
    ) -> CoreResult<Self> {
        if dataset.size() == 0 {
            return Err(CoreError::invalid_state("cannot build an IVF index over an empty dataset"));
        }
        let training = sample_training_indices(dataset, params.training_fraction, seed);
        let centroids = if params.hierarchical {
            hierarchical_kmeans(
                dataset,
                &training,
                params.num_centroids,
                params.l1(),
                params.num_iterations,
                params.minibatch_size,
                distance_kind,
                &thread_pool,
                seed,
            )
        } else {
            flat_kmeans(
                dataset,
                &training,
                params.num_centroids,
                params.num_iterations,
                params.minibatch_size,
                distance_kind,
                &thread_pool,
                seed,
            )
        };
        let clustering = assign_all(dataset, &centroids, distance_kind, params.max_cluster_size, &thread_pool);
        tracing::info!(clusters = clustering.num_clusters(), members = clustering.total_members(), "built IVF index");
        let storage = DenseClusteredDataset::build(dataset, &clustering, centroids);
        Ok(Self {
            storage,
            distance_kind,
            params,
            thread_pool,
        })
    }

    #[must_use]
    pub fn num_clusters(&self) -> usize {
        self.storage.num_clusters()
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.storage.dimensions()
    }

    #[must_use]
    pub fn params(&self) -> &IvfParams {
        &self.params
    }

    /// Runs the two-stage search described in §4.12, returning up to `k`
    /// `(internal_id, distance)` pairs in the distance's natural order.
    #[must_use]
    pub fn search(&self, query: &[f32], k: usize, cancel: CancelPredicate<'_>) -> Vec<(InternalId, f32)> {
        let distance = AnyDistance::new(self.distance_kind).fix_argument(query);

        let mut probe_buffer = SearchBuffer::new(self.distance_kind, self.params.n_probes);
        for c in 0..self.storage.num_centroids() {
            let d = distance.compute(self.storage.centroid(c));
            probe_buffer.insert(c as u32, d);
        }
        let probed: Vec<usize> = probe_buffer.top_k(self.params.n_probes).iter().map(|e| e.id as usize).collect();

        let pool_size = (self.params.k_reorder * k).max(k).max(1);
        let n_inner = self.params.n_inner_threads.max(1);

        let partials: Vec<parking_lot::Mutex<Vec<(InternalId, f32)>>> =
            (0..probed.len()).map(|_| parking_lot::Mutex::new(Vec::new())).collect();

        let scan_cluster = |idx: usize| {
            let cluster = probed[idx];
            let mut local = SearchBuffer::new(self.distance_kind, pool_size);
            for local_idx in 0..self.storage.cluster_size(cluster) {
                let vector = vamana_core::element::to_f32_vec(self.storage.vector_at(cluster, local_idx));
                let d = distance.compute(&vector);
                local.insert(local_idx as u32, d);
            }
            let ids = self.storage.ids_in(cluster);
            *partials[idx].lock() = local.top_k(pool_size).iter().map(|e| (ids[e.id as usize], e.distance)).collect();
        };

        // `cancel` is `&dyn Fn() -> bool` with no `Sync` bound, so it can't
        // be captured inside the `parallel_for` closure below; the
        // intra-query-parallel path instead polls once up front, matching
        // "checked at loop-level granularity" without requiring the
        // predicate itself to be thread-safe.
        if n_inner > 1 && !cancel() {
            self.thread_pool.parallel_for(probed.len(), Partition::DynamicBlockSize(1), |idx| {
                scan_cluster(idx);
            });
        } else if n_inner <= 1 {
            for idx in 0..probed.len() {
                if cancel() {
                    break;
                }
                scan_cluster(idx);
            }
        }

        let mut merged: Vec<(InternalId, f32)> = partials.into_iter().flat_map(|m| m.into_inner()).collect();
        merged.sort_by(|a, b| self.distance_kind.compare(a.1, b.1));
        merged.dedup_by_key(|e| e.0);
        merged.truncate(k);
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vamana_core::dataset::ContiguousDataset;
    use vamana_core::never_cancel;

    fn three_blob_dataset() -> ContiguousDataset<f32> {
        let mut d: ContiguousDataset<f32> = ContiguousDataset::new(2);
        for &(cx, cy) in &[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)] {
            for i in 0..30 {
                let jitter = (i as f32 - 15.0) * 0.03;
                d.push(&[cx + jitter, cy + jitter]).unwrap();
            }
        }
        d
    }

    #[test]
    fn search_returns_points_from_the_queried_blob() {
        let dataset = three_blob_dataset();
        let params = IvfParams {
            num_centroids: 3,
            training_fraction: 1.0,
            num_iterations: 8,
            minibatch_size: 32,
            n_probes: 1,
            k_reorder: 2,
            ..IvfParams::default()
        };
        let index = IvfIndex::build(&dataset, DistanceKind::L2, params, ThreadPoolHandle::sequential(), 11).unwrap();
        let results = index.search(&[0.0, 0.0], 5, &never_cancel);
        assert_eq!(results.len(), 5);
        for &(id, _) in &results {
            assert!(id < 30, "expected a point from the (0,0) blob, got id {id}");
        }
    }

    #[test]
    fn results_have_no_duplicate_ids_and_are_sorted() {
        let dataset = three_blob_dataset();
        let params = IvfParams {
            num_centroids: 3,
            training_fraction: 1.0,
            num_iterations: 8,
            minibatch_size: 32,
            n_probes: 3,
            k_reorder: 3,
            n_inner_threads: 2,
            ..IvfParams::default()
        };
        let index = IvfIndex::build(&dataset, DistanceKind::L2, params, ThreadPoolHandle::fixed(2), 3).unwrap();
        let results = index.search(&[5.0, 5.0], 10, &never_cancel);
        let mut ids: Vec<InternalId> = results.iter().map(|&(id, _)| id).collect();
        let unique_count = {
            ids.sort_unstable();
            ids.dedup();
            ids.len()
        };
        assert_eq!(unique_count, results.len());
        for pair in results.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }
}
