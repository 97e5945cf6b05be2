//! Dense clustered storage (§4.11): vectors belonging to the same
//! cluster are stored contiguously, each cluster's global IDs in a
//! parallel array, with a pointer table giving each cluster's base
//! offset for O(1) lookup. The centroid table is kept as a separate,
//! always-uncompressed dataset.

use vamana_core::dataset::{ContiguousDataset, Dataset};
use vamana_core::element::Element;
use vamana_core::ids::InternalId;

use crate::clustering::Clustering;

/// `(start_row, row_count)` into the flat vector/id arrays for one cluster.
#[derive(Debug, Clone, Copy)]
struct ClusterSpan {
    start: usize,
    count: usize,
}

/// The materialized clustering: one contiguous run per cluster, plus a
/// separate uncompressed centroid table (size `C x d`).
pub struct DenseClusteredDataset<T: Element> {
    vectors: ContiguousDataset<T>,
    global_ids: Vec<InternalId>,
    spans: Vec<ClusterSpan>,
    centroids: ContiguousDataset<f32>,
}

impl<T: Element> DenseClusteredDataset<T> {
    /// Builds the dense representation from a dataset and a clustering
    /// computed over it, materializing clusters in ascending cluster-index
    /// order.
    #[must_use]
    pub fn build<D: Dataset<T>>(dataset: &D, clustering: &Clustering, centroids: Vec<Vec<f32>>) -> Self {
        let dims = dataset.dimensions();
        let mut vectors: ContiguousDataset<T> = ContiguousDataset::new(dims);
        let mut global_ids = Vec::with_capacity(clustering.total_members());
        let mut spans = Vec::with_capacity(clustering.num_clusters());

        for cluster in 0..clustering.num_clusters() {
            let start = global_ids.len();
            for &(id, _) in clustering.members(cluster) {
                vectors.push(dataset.get_datum(id as usize)).expect("dimensions already validated by caller");
                global_ids.push(id);
            }
            spans.push(ClusterSpan {
                start,
                count: global_ids.len() - start,
            });
        }

        let centroid_dims = centroids.first().map_or(dims, Vec::len);
        let mut centroid_table: ContiguousDataset<f32> = ContiguousDataset::new(centroid_dims);
        for c in &centroids {
            centroid_table.push(c).expect("all centroids share dimensionality");
        }

        Self {
            vectors,
            global_ids,
            spans,
            centroids: centroid_table,
        }
    }

    #[must_use]
    pub fn num_clusters(&self) -> usize {
        self.spans.len()
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.vectors.dimensions()
    }

    #[must_use]
    pub fn centroid(&self, cluster: usize) -> &[f32] {
        self.centroids.get_datum(cluster)
    }

    #[must_use]
    pub fn num_centroids(&self) -> usize {
        self.centroids.size()
    }

    /// The global IDs belonging to `cluster`, in the same order as
    /// [`DenseClusteredDataset::vector_at`].
    #[must_use]
    pub fn ids_in(&self, cluster: usize) -> &[InternalId] {
        let span = self.spans[cluster];
        &self.global_ids[span.start..span.start + span.count]
    }

    /// The `local`-th vector stored in `cluster`.
    #[must_use]
    pub fn vector_at(&self, cluster: usize, local: usize) -> &[T] {
        let span = self.spans[cluster];
        self.vectors.get_datum(span.start + local)
    }

    #[must_use]
    pub fn cluster_size(&self, cluster: usize) -> usize {
        self.spans[cluster].count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vamana_core::distance::DistanceKind;
    use vamana_core::threadpool::ThreadPoolHandle;

    use crate::clustering::assign_all;

    #[test]
    fn cluster_spans_cover_every_assigned_point_contiguously() {
        let mut dataset: ContiguousDataset<f32> = ContiguousDataset::new(1);
        for i in 0..9 {
            dataset.push(&[i as f32]).unwrap();
        }
        let centroids = vec![vec![1.0f32], vec![5.0f32], vec![8.0f32]];
        let pool = ThreadPoolHandle::sequential();
        let clustering = assign_all(&dataset, &centroids, DistanceKind::L2, 100, &pool);
        let dense = DenseClusteredDataset::build(&dataset, &clustering, centroids);

        assert_eq!(dense.num_clusters(), 3);
        let mut seen = std::collections::HashSet::new();
        for cluster in 0..dense.num_clusters() {
            for local in 0..dense.cluster_size(cluster) {
                let id = dense.ids_in(cluster)[local];
                assert!(seen.insert(id), "id {id} appeared in more than one cluster");
                assert_eq!(dense.vector_at(cluster, local)[0], id as f32);
            }
        }
        assert_eq!(seen.len(), 9);
    }
}
