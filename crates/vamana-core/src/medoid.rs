//! Shared medoid/centroid utility: the vector minimizing summed distance to
//! the rest of a set. Used as the Vamana builder's entry point and, in
//! `vamana-quant`, as the "global" one-level LVQ centroid — one routine
//! instead of two copies (§9 open question on shared utilities).

use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::dataset::Dataset;
use crate::element::Element;

/// Approximates the medoid by sampling up to `sample_size` rows and
/// picking whichever sampled row has the smallest summed L2 distance to
/// the rest of the sample — exact on small datasets, a fast approximation
/// on large ones, matching the teacher's `compute_medoid` approach.
pub fn approximate_medoid<T: Element, D: Dataset<T>>(
    dataset: &D,
    sample_size: usize,
    seed: u64,
) -> usize {
    let n = dataset.size();
    if n == 0 {
        return 0;
    }
    let sample_size = sample_size.min(n);
    let mut indices: Vec<usize> = (0..n).collect();
    if sample_size < n {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);
    }
    let sample = &indices[..sample_size];

    let mut best_idx = sample[0];
    let mut best_sum = f32::MAX;
    for &i in sample {
        let vi = crate::element::to_f32_vec(dataset.get_datum(i));
        let mut sum = 0.0f32;
        for &j in sample {
            let vj = crate::element::to_f32_vec(dataset.get_datum(j));
            sum += vi.iter().zip(&vj).map(|(a, b)| (a - b) * (a - b)).sum::<f32>();
        }
        if sum < best_sum {
            best_sum = sum;
            best_idx = i;
        }
    }
    best_idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ContiguousDataset;

    #[test]
    fn medoid_of_symmetric_cluster_is_center() {
        let mut d: ContiguousDataset<f32> = ContiguousDataset::new(1);
        for v in [-2.0f32, -1.0, 0.0, 1.0, 2.0] {
            d.push(&[v]).unwrap();
        }
        let medoid = approximate_medoid(&d, 5, 42);
        assert_eq!(medoid, 2);
    }
}
