//! Flat and hierarchical K-means centroid training (§4.10).
//!
//! Assignment is a brute-force nearest-centroid scan rather than the
//! batched matmul the spec's derivation describes; the result is
//! identical and the scan is what the rest of this crate's search path
//! already does, so the same routine serves both without a separate
//! linear-algebra dependency.

use rand::seq::SliceRandom;
use rand::SeedableRng;

use vamana_core::dataset::Dataset;
use vamana_core::distance::{DistanceKind, DistanceOrder};
use vamana_core::element::Element;
use vamana_core::threadpool::{Partition, ThreadPoolHandle};

/// Returns the index of, and raw distance to, `point`'s nearest centroid.
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

fn raw_distance(kind: DistanceKind, a: &[f32], b: &[f32]) -> f32 {
    match kind {
        DistanceKind::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
        DistanceKind::Ip | DistanceKind::Cosine => a.iter().zip(b).map(|(x, y)| x * y).sum(),
    }
}

/// Samples `floor(fraction * dataset.size())` distinct row indices.
pub fn sample_training_indices<T: Element, D: Dataset<T>>(dataset: &D, fraction: f32, seed: u64) -> Vec<usize> {
    let n = dataset.size();
    let count = ((n as f32) * fraction).floor() as usize;
    let count = count.clamp(1, n);
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    order.truncate(count);
    order
}

fn init_centroids<T: Element, D: Dataset<T>>(dataset: &D, indices: &[usize], c: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut pool = indices.to_vec();
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed ^ 0x5EED_C3);
    pool.shuffle(&mut rng);
    pool.truncate(c.min(pool.len()));
    pool.iter()
        .map(|&i| vamana_core::element::to_f32_vec(dataset.get_datum(i)))
        .collect()
}

/// One run of minibatch K-means over `training` row indices of `dataset`,
/// starting from `c` randomly sampled centroids and iterating
/// `num_iterations` times. Empty clusters keep their previous centroid.
///
/// Assignment (the expensive step) runs across `thread_pool`; the
/// sum/count accumulation that follows is a short sequential reduction,
/// mirroring the two-phase "parallel compute, sequential apply" pattern
/// used by the Vamana graph builder.
#[allow(clippy::too_many_arguments)]
pub fn flat_kmeans<T: Element, D: Dataset<T>>(
    dataset: &D,
    training: &[usize],
    c: usize,
    num_iterations: usize,
    minibatch_size: usize,
    kind: DistanceKind,
    thread_pool: &ThreadPoolHandle,
    seed: u64,
) -> Vec<Vec<f32>> {
    let dims = dataset.dimensions();
    let mut centroids = init_centroids(dataset, training, c, seed);
    if centroids.is_empty() {
        return centroids;
    }

    for iter in 0..num_iterations {
        let mut order = training.to_vec();
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed.wrapping_add(iter as u64 + 1));
        order.shuffle(&mut rng);

        for batch in order.chunks(minibatch_size.max(1)) {
            let assignments: Vec<usize> = {
                let slots: Vec<parking_lot::Mutex<usize>> = (0..batch.len()).map(|_| parking_lot::Mutex::new(0)).collect();
                let centroids_ref = &centroids;
                thread_pool.parallel_for(batch.len(), Partition::DynamicBlockSize(64), |slot| {
                    let point = vamana_core::element::to_f32_vec(dataset.get_datum(batch[slot]));
                    *slots[slot].lock() = nearest_centroid(centroids_ref, &point, kind).0;
                });
                slots.into_iter().map(|m| m.into_inner()).collect()
            };

            let mut sums = vec![vec![0.0f32; dims]; centroids.len()];
            let mut counts = vec![0u32; centroids.len()];
            for (&row, &cluster) in batch.iter().zip(&assignments) {
                let point = vamana_core::element::to_f32_vec(dataset.get_datum(row));
                for (s, p) in sums[cluster].iter_mut().zip(&point) {
                    *s += p;
                }
                counts[cluster] += 1;
            }
            for (cluster, count) in counts.into_iter().enumerate() {
                if count == 0 {
                    continue;
                }
                for (c_val, s) in centroids[cluster].iter_mut().zip(&sums[cluster]) {
                    *c_val = s / count as f32;
                }
            }
        }
    }
    centroids
}

/// Hierarchical K-means (§4.10): a coarse level-1 pass followed by
/// independent level-2 passes sized proportionally to each level-1
/// cluster's share of the training set, concatenated into the final
/// centroid set.
#[allow(clippy::too_many_arguments)]
pub fn hierarchical_kmeans<T: Element, D: Dataset<T>>(
    dataset: &D,
    training: &[usize],
    c: usize,
    l1_clusters: usize,
    num_iterations: usize,
    minibatch_size: usize,
    kind: DistanceKind,
    thread_pool: &ThreadPoolHandle,
    seed: u64,
) -> Vec<Vec<f32>> {
    let l1_centroids = flat_kmeans(dataset, training, l1_clusters, num_iterations, minibatch_size, kind, thread_pool, seed);
    if l1_centroids.is_empty() {
        return l1_centroids;
    }

    let mut groups: Vec<Vec<usize>> = vec![Vec::new(); l1_centroids.len()];
    for &row in training {
        let point = vamana_core::element::to_f32_vec(dataset.get_datum(row));
        let (cluster, _) = nearest_centroid(&l1_centroids, &point, kind);
        groups[cluster].push(row);
    }

    let n_training = training.len().max(1);
    let mut quotas: Vec<usize> = groups.iter().map(|g| ((g.len() * c) as f64 / n_training as f64).round() as usize).collect();
    let assigned: usize = quotas.iter().sum();
    let mut remainder = c.saturating_sub(assigned) as i64 - (assigned as i64 - c as i64).max(0);
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed ^ 0xA110_CA7E);
    let mut order: Vec<usize> = (0..quotas.len()).collect();
    order.shuffle(&mut rng);
    let mut idx = 0;
    while remainder > 0 && !order.is_empty() {
        quotas[order[idx % order.len()]] += 1;
        remainder -= 1;
        idx += 1;
    }

    let mut final_centroids = Vec::with_capacity(c);
    for (j, group) in groups.iter().enumerate() {
        let quota = quotas[j];
        if quota == 0 || group.is_empty() {
            continue;
        }
        let level2 = flat_kmeans(dataset, group, quota, num_iterations, minibatch_size, kind, thread_pool, seed.wrapping_add(j as u64 + 1));
        final_centroids.extend(level2);
    }
    final_centroids
}

#[cfg(test)]
mod tests {
    use super::*;
    use vamana_core::dataset::ContiguousDataset;

    fn three_blob_dataset() -> ContiguousDataset<f32> {
        let mut d: ContiguousDataset<f32> = ContiguousDataset::new(2);
        for &(cx, cy) in &[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)] {
            for i in 0..20 {
                let jitter = (i as f32 - 10.0) * 0.02;
                d.push(&[cx + jitter, cy + jitter]).unwrap();
            }
        }
        d
    }

    #[test]
    fn flat_kmeans_recovers_three_well_separated_blobs() {
        let dataset = three_blob_dataset();
        let training: Vec<usize> = (0..dataset.size()).collect();
        let pool = ThreadPoolHandle::sequential();
        let centroids = flat_kmeans(&dataset, &training, 3, 10, 16, DistanceKind::L2, &pool, 42);
        assert_eq!(centroids.len(), 3);
        // Each expected blob center should be close to some centroid.
        for &(cx, cy) in &[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)] {
            let closest = centroids
                .iter()
                .map(|c| ((c[0] - cx).powi(2) + (c[1] - cy).powi(2)).sqrt())
                .fold(f32::INFINITY, f32::min);
            assert!(closest < 1.0, "expected a centroid near ({cx}, {cy}), got {centroids:?}");
        }
    }

    #[test]
    fn hierarchical_kmeans_produces_requested_total_centroid_count() {
        let dataset = three_blob_dataset();
        let training: Vec<usize> = (0..dataset.size()).collect();
        let pool = ThreadPoolHandle::sequential();
        let centroids = hierarchical_kmeans(&dataset, &training, 6, 2, 5, 16, DistanceKind::L2, &pool, 7);
        assert_eq!(centroids.len(), 6);
    }
}
