//! The `Clustering` type (§3, §4.10 "post-clustering assignment"): a
//! mapping from centroid index to an ordered list of (internal id,
//! distance-to-centroid) pairs, capped at `max_cluster_size` by keeping
//! only the closest members.

use vamana_core::dataset::Dataset;
use vamana_core::distance::{DistanceKind, DistanceOrder};
use vamana_core::element::Element;
use vamana_core::ids::InternalId;
use vamana_core::threadpool::{Partition, ThreadPoolHandle};

fn raw_distance(kind: DistanceKind, a: &[f32], b: &[f32]) -> f32 {
    match kind {
        DistanceKind::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
        DistanceKind::Ip | DistanceKind::Cosine => a.iter().zip(b).map(|(x, y)| x * y).sum(),
    }
}

fn nearest_centroid(centroids: &[Vec<f32>], point: &[f32], kind: DistanceKind) -> (usize, f32) {
    let mut best = (0usize, raw_distance(kind, &centroids[0], point));
    for (idx, c) in centroids.iter().enumerate().skip(1) {
        let d = raw_distance(kind, c, point);
        if kind.closer(d, best.1) {
            best = (idx, d);
        }
    }
    best
}

/// Centroid index to member list, closest first.
#[derive(Debug, Clone, Default)]
pub struct Clustering {
    clusters: Vec<Vec<(InternalId, f32)>>,
}

impl Clustering {
    #[must_use]
    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    #[must_use]
    pub fn members(&self, cluster: usize) -> &[(InternalId, f32)] {
        &self.clusters[cluster]
    }

    #[must_use]
    pub fn total_members(&self) -> usize {
        self.clusters.iter().map(Vec::len).sum()
    }
}

/// Assigns every row of `dataset` to its nearest centroid (intra-query
/// parallel scan, same two-phase compute/apply split as K-means
/// assignment), then truncates each cluster to `max_cluster_size`,
/// retaining the closest members and dropping overflow points (§4.10:
/// "overflow points are not propagated").
pub fn assign_all<T: Element, D: Dataset<T>>(
    dataset: &D,
    centroids: &[Vec<f32>],
    kind: DistanceKind,
    max_cluster_size: usize,
    thread_pool: &ThreadPoolHandle,
) -> Clustering {
    let n = dataset.size();
    let assignments: Vec<parking_lot::Mutex<(usize, f32)>> =
        (0..n).map(|_| parking_lot::Mutex::new((0usize, 0.0f32))).collect();
    thread_pool.parallel_for(n, Partition::DynamicBlockSize(256), |i| {
        let point = vamana_core::element::to_f32_vec(dataset.get_datum(i));
        *assignments[i].lock() = nearest_centroid(centroids, &point, kind);
    });

    let mut clusters: Vec<Vec<(InternalId, f32)>> = vec![Vec::new(); centroids.len()];
    for (i, lock) in assignments.iter().enumerate() {
        let (cluster, distance) = *lock.lock();
        clusters[cluster].push((i as InternalId, distance));
    }
    for cluster in &mut clusters {
        cluster.sort_by(|a, b| kind.compare(a.1, b.1));
        cluster.truncate(max_cluster_size);
    }
    Clustering { clusters }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vamana_core::dataset::ContiguousDataset;

    #[test]
    fn every_point_lands_in_its_nearest_centroid() {
        let mut dataset: ContiguousDataset<f32> = ContiguousDataset::new(1);
        for i in 0..10 {
            dataset.push(&[i as f32]).unwrap();
        }
        let centroids = vec![vec![1.0f32], vec![8.0f32]];
        let pool = ThreadPoolHandle::sequential();
        let clustering = assign_all(&dataset, &centroids, DistanceKind::L2, 100, &pool);
        assert_eq!(clustering.num_clusters(), 2);
        assert_eq!(clustering.total_members(), 10);
        let near_zero: Vec<InternalId> = clustering.members(0).iter().map(|&(id, _)| id).collect();
        assert!(near_zero.contains(&0));
        assert!(!near_zero.contains(&9));
    }

    #[test]
    fn overflow_points_are_dropped_not_redistributed() {
        let mut dataset: ContiguousDataset<f32> = ContiguousDataset::new(1);
        for i in 0..10 {
            dataset.push(&[i as f32]).unwrap();
        }
        let centroids = vec![vec![0.0f32]];
        let pool = ThreadPoolHandle::sequential();
        let clustering = assign_all(&dataset, &centroids, DistanceKind::L2, 3, &pool);
        assert_eq!(clustering.members(0).len(), 3);
        assert_eq!(clustering.total_members(), 3);
    }
}
