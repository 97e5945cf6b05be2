//! Dynamic IVF (§4.13): the same centroid table and two-stage search as
//! [`crate::search::IvfIndex`], but clusters are individually growable
//! and shrinkable `Vec`s behind an [`IdTranslator`] so points can be
//! added and removed by caller-chosen external ID.

use vamana_core::dataset::Dataset;
use vamana_core::distance::{AnyDistance, DistanceKind, DistanceOrder};
use vamana_core::element::Element;
use vamana_core::error::{CoreError, CoreResult};
use vamana_core::ids::{ExternalId, IdTranslator, InternalId};
use vamana_core::search_buffer::SearchBuffer;
use vamana_core::threadpool::ThreadPoolHandle;
use vamana_core::CancelPredicate;

use crate::clustering::assign_all;
use crate::kmeans::{flat_kmeans, hierarchical_kmeans, sample_training_indices};
use crate::search::IvfParams;

fn raw_distance(kind: DistanceKind, a: &[f32], b: &[f32]) -> f32 {
    match kind {
        DistanceKind::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
        DistanceKind::Ip | DistanceKind::Cosine => a.iter().zip(b).map(|(x, y)| x * y).sum(),
    }
}

fn nearest_centroid(centroids: &[Vec<f32>], point: &[f32], kind: DistanceKind) -> usize {
    let mut best = (0usize, raw_distance(kind, &centroids[0], point));
    for (idx, c) in centroids.iter().enumerate().skip(1) {
        let d = raw_distance(kind, c, point);
        if kind.closer(d, best.1) {
            best = (idx, d);
        }
    }
    best.0
}

struct Bucket<T: Element> {
    rows: Vec<(InternalId, Vec<T>)>,
}

impl<T: Element> Bucket<T> {
    fn new() -> Self {
        Self { rows: Vec::new() }
    }
}

/// A mutable IVF index. Clusters are plain `Vec`s rather than the static
/// index's dense contiguous blocks, since `add_points`/`delete_entries`
/// change cluster membership far more often than the static variant's
/// build-once layout is designed for; [`DynamicIvfIndex::compact`] is
/// what keeps them from accumulating unbounded tombstones.
pub struct DynamicIvfIndex<T: Element> {
    dims: usize,
    centroids: Vec<Vec<f32>>,
    clusters: Vec<Bucket<T>>,
    translator: IdTranslator,
    distance_kind: DistanceKind,
    params: IvfParams,
    thread_pool: ThreadPoolHandle,
    /// Points appended to a cluster already at `max_cluster_size`;
    /// `rebuild` folds them back into clustering on the caller's schedule.
    needs_rebuild: bool,
}

impl<T: Element> DynamicIvfIndex<T> {
    /// Trains centroids and clusters the initial batch, matching external
    /// IDs 1:1 with rows of `dataset`.
    ///
    /// # Errors
    /// [`CoreError::InvalidState`] if `dataset` is empty, or
    /// [`CoreError::DimensionMismatch`] if `external_ids.len() !=
    /// dataset.size()`.
    pub fn build<D: Dataset<T>>(
        dataset: &D,
        external_ids: &[ExternalId],
        distance_kind: DistanceKind,
        params: IvfParams,
        thread_pool: ThreadPoolHandle,
        seed: u64,
    ) -> CoreResult<Self> {
        let size = dataset.size();
        if size == 0 {
            return Err(CoreError::invalid_state("cannot build a dynamic IVF index over an empty dataset"));
        }
        if external_ids.len() != size {
            return Err(CoreError::DimensionMismatch {
                expected: size,
                found: external_ids.len(),
            });
        }
        let training = sample_training_indices(dataset, params.training_fraction, seed);
        let centroids = if params.hierarchical {
            hierarchical_kmeans(
                dataset,
                &training,
                params.num_centroids,
                if params.l1_clusters > 0 { params.l1_clusters } else { (params.num_centroids as f64).sqrt().ceil() as usize },
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

        let mut translator = IdTranslator::new();
        for &ext in external_ids {
            translator.allocate(ext, false)?;
        }

        let mut clusters: Vec<Bucket<T>> = (0..centroids.len()).map(|_| Bucket::new()).collect();
        for cluster_idx in 0..clustering.num_clusters() {
            for &(internal_id, _) in clustering.members(cluster_idx) {
                let row = dataset.get_datum(internal_id as usize).to_vec();
                clusters[cluster_idx].rows.push((internal_id, row));
            }
        }

        Ok(Self {
            dims: dataset.dimensions(),
            centroids,
            clusters,
            translator,
            distance_kind,
            params,
            thread_pool,
            needs_rebuild: false,
        })
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.translator.live_count()
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dims
    }

    #[must_use]
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    /// Adds new points with caller-supplied external IDs, assigning each
    /// to its nearest centroid. A point landing in an already-full
    /// cluster is still appended (clusters have no hard capacity at
    /// runtime) but flags the index as due for [`DynamicIvfIndex::rebuild`].
    ///
    /// # Errors
    /// [`CoreError::Other`] if any external id is already live, or
    /// [`CoreError::DimensionMismatch`] if `vectors.len() != external_ids.len()`.
    pub fn add_points(&mut self, vectors: &[Vec<T>], external_ids: &[ExternalId]) -> CoreResult<()> {
        if vectors.len() != external_ids.len() {
            return Err(CoreError::DimensionMismatch {
                expected: external_ids.len(),
                found: vectors.len(),
            });
        }
        for (vector, &external_id) in vectors.iter().zip(external_ids) {
            let internal_id = self.translator.allocate(external_id, true)?;
            let point_f32 = vamana_core::element::to_f32_vec(vector);
            let cluster = nearest_centroid(&self.centroids, &point_f32, self.distance_kind);
            if self.clusters[cluster].rows.len() >= self.params.max_cluster_size {
                self.needs_rebuild = true;
            }
            self.clusters[cluster].rows.push((internal_id, vector.clone()));
        }
        Ok(())
    }

    /// Tombstones `external_ids`; their rows stay physically present
    /// until [`DynamicIvfIndex::compact`] runs, but are filtered out of
    /// search immediately.
    ///
    /// # Errors
    /// [`CoreError::NotFound`] if any external id is not currently live.
    pub fn delete_entries(&mut self, external_ids: &[ExternalId]) -> CoreResult<()> {
        for &ext in external_ids {
            self.translator.tombstone(ext)?;
        }
        Ok(())
    }

    /// Drops tombstoned rows from every cluster and frees their slots.
    pub fn compact(&mut self) {
        for bucket in &mut self.clusters {
            bucket.rows.retain(|&(id, _)| !self.translator.is_tombstoned(id));
        }
        self.translator.consolidate();
    }

    /// Retrains centroids and re-clusters every live point from scratch,
    /// clearing [`DynamicIvfIndex::needs_rebuild`]. Should run whenever a
    /// cluster has been growing past `max_cluster_size` for a while, at a
    /// cadence the caller controls.
    pub fn rebuild<D: Dataset<T>>(&mut self, seed: u64) {
        let mut rows: Vec<(InternalId, Vec<T>)> = Vec::new();
        for bucket in &self.clusters {
            for &(id, ref v) in &bucket.rows {
                if !self.translator.is_tombstoned(id) {
                    rows.push((id, v.clone()));
                }
            }
        }
        if rows.is_empty() {
            return;
        }
        let flat: Vec<T> = rows.iter().flat_map(|(_, v)| v.iter().cloned()).collect();
        let dataset = vamana_core::dataset::ContiguousDataset::from_rows(flat, self.dims).expect("uniform row width");
        let training = sample_training_indices(&dataset, self.params.training_fraction, seed);
        let centroids = if self.params.hierarchical {
            hierarchical_kmeans(
                &dataset,
                &training,
                self.params.num_centroids,
                if self.params.l1_clusters > 0 { self.params.l1_clusters } else { (self.params.num_centroids as f64).sqrt().ceil() as usize },
                self.params.num_iterations,
                self.params.minibatch_size,
                self.distance_kind,
                &self.thread_pool,
                seed,
            )
        } else {
            flat_kmeans(
                &dataset,
                &training,
                self.params.num_centroids,
                self.params.num_iterations,
                self.params.minibatch_size,
                self.distance_kind,
                &self.thread_pool,
                seed,
            )
        };

        let mut clusters: Vec<Bucket<T>> = (0..centroids.len()).map(|_| Bucket::new()).collect();
        for (row_idx, (internal_id, _)) in rows.iter().enumerate() {
            let point = vamana_core::element::to_f32_vec(dataset.get_datum(row_idx));
            let cluster = nearest_centroid(&centroids, &point, self.distance_kind);
            clusters[cluster].rows.push((*internal_id, rows[row_idx].1.clone()));
        }

        self.centroids = centroids;
        self.clusters = clusters;
        self.needs_rebuild = false;
    }

    /// Two-stage search (§4.12) over the live (non-tombstoned) rows,
    /// translating surviving hits back to external IDs.
    #[must_use]
    pub fn search(&self, query: &[f32], k: usize, cancel: CancelPredicate<'_>) -> Vec<(ExternalId, f32)> {
        let distance = AnyDistance::new(self.distance_kind).fix_argument(query);

        let mut probe_buffer = SearchBuffer::new(self.distance_kind, self.params.n_probes);
        for (idx, c) in self.centroids.iter().enumerate() {
            probe_buffer.insert(idx as u32, distance.compute(c));
        }
        let probed: Vec<usize> = probe_buffer.top_k(self.params.n_probes).iter().map(|e| e.id as usize).collect();

        let pool_size = (self.params.k_reorder * k).max(k).max(1);
        let mut candidates = SearchBuffer::new(self.distance_kind, pool_size);
        for &cluster in &probed {
            if cancel() {
                break;
            }
            for &(internal_id, ref vector) in &self.clusters[cluster].rows {
                if self.translator.is_tombstoned(internal_id) {
                    continue;
                }
                let point = vamana_core::element::to_f32_vec(vector);
                let d = distance.compute(&point);
                candidates.insert(internal_id, d);
            }
        }

        candidates
            .top_k(k)
            .iter()
            .filter_map(|e| self.translator.get_external(e.id).map(|ext| (ext, e.distance)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vamana_core::dataset::ContiguousDataset;
    use vamana_core::never_cancel;

    fn small_index() -> DynamicIvfIndex<f32> {
        let mut dataset: ContiguousDataset<f32> = ContiguousDataset::new(1);
        for i in 0..20 {
            dataset.push(&[i as f32]).unwrap();
        }
        let ids: Vec<ExternalId> = (100..120).collect();
        let params = IvfParams {
            num_centroids: 4,
            training_fraction: 1.0,
            num_iterations: 5,
            minibatch_size: 16,
            n_probes: 4,
            k_reorder: 3,
            ..IvfParams::default()
        };
        DynamicIvfIndex::build(&dataset, &ids, DistanceKind::L2, params, ThreadPoolHandle::sequential(), 9).unwrap()
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
    fn compact_shrinks_physical_rows_while_keeping_live_count() {
        let mut index = small_index();
        index.delete_entries(&[100, 101]).unwrap();
        assert_eq!(index.live_count(), 18);
        index.compact();
        assert_eq!(index.live_count(), 18);
        let total_rows: usize = index.clusters.iter().map(|b| b.rows.len()).sum();
        assert_eq!(total_rows, 18);
    }

    #[test]
    fn add_points_makes_new_external_id_searchable() {
        let mut index = small_index();
        index.add_points(&[vec![50.0]], &[500]).unwrap();
        let results = index.search(&[50.0], 1, &never_cancel);
        assert_eq!(results[0].0, 500);
    }
}
