//! LeanVec (§4.6): linear dimensionality reduction to a lower-dimensional
//! "primary" dataset used to drive the graph search, paired with a
//! full-dimensional "secondary" dataset used only to rerank the final
//! candidate set. Two ways to fit the projection: PCA (mean-subtracted,
//! via the data's own covariance structure) and out-of-distribution (OOD,
//! fit against a supplied auxiliary query sample instead of the base data).

use vamana_core::dataset::{ContiguousDataset, Dataset};
use vamana_core::element::Element;
use vamana_core::error::{CoreError, CoreResult};

/// How the reduction matrix was fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReductionMode {
    /// Fit on the base data's own principal directions.
    Pca,
    /// Fit against a supplied sample believed to better match query-time
    /// distribution than the base data (e.g. a held-out query log).
    OutOfDistribution,
}

/// A `leading_dimensions x dimensions` row-major projection, plus the mean
/// subtracted before projecting (zero vector when no centering was used).
#[derive(Debug, Clone)]
pub struct ReductionMatrix {
    rows: Vec<f32>,
    leading_dimensions: usize,
    dimensions: usize,
    mean: Vec<f32>,
}

impl ReductionMatrix {
    fn project(&self, v: &[f32]) -> Vec<f32> {
        let mut centered = v.to_vec();
        for (c, m) in centered.iter_mut().zip(&self.mean) {
            *c -= m;
        }
        let mut out = vec![0.0f32; self.leading_dimensions];
        for (r, slot) in out.iter_mut().enumerate() {
            let row = &self.rows[r * self.dimensions..(r + 1) * self.dimensions];
            *slot = row.iter().zip(&centered).map(|(a, b)| a * b).sum();
        }
        out
    }

    /// Fits a projection by power-iteration PCA (top `leading_dimensions`
    /// principal directions), or, in OOD mode, by the same power-iteration
    /// routine applied to `fit_sample` instead of `base_sample`.
    fn fit(
        base_sample: &[Vec<f32>],
        fit_sample: &[Vec<f32>],
        dimensions: usize,
        leading_dimensions: usize,
        mode: ReductionMode,
    ) -> CoreResult<Self> {
        if leading_dimensions == 0 || leading_dimensions > dimensions {
            return Err(CoreError::other(format!(
                "leading_dimensions {leading_dimensions} must be in (0, {dimensions}]"
            )));
        }
        let training_sample = match mode {
            ReductionMode::Pca => base_sample,
            ReductionMode::OutOfDistribution => fit_sample,
        };
        if training_sample.is_empty() {
            return Err(CoreError::other("reduction training sample is empty"));
        }

        let mean = mean_vector(training_sample, dimensions);
        let centered: Vec<Vec<f32>> = training_sample
            .iter()
            .map(|row| row.iter().zip(&mean).map(|(a, b)| a - b).collect())
            .collect();

        let mut rows = Vec::with_capacity(leading_dimensions * dimensions);
        let mut deflated = centered;
        for _ in 0..leading_dimensions {
            let direction = power_iteration(&deflated, dimensions, 64);
            deflate(&mut deflated, &direction);
            rows.extend(direction);
        }

        Ok(Self {
            rows,
            leading_dimensions,
            dimensions,
            mean,
        })
    }
}

fn mean_vector(sample: &[Vec<f32>], dimensions: usize) -> Vec<f32> {
    let mut mean = vec![0.0f32; dimensions];
    for row in sample {
        for (m, v) in mean.iter_mut().zip(row) {
            *m += v;
        }
    }
    let n = sample.len() as f32;
    for m in &mut mean {
        *m /= n;
    }
    mean
}

/// Finds the dominant eigenvector of the sample covariance matrix without
/// materializing the `d x d` matrix, by repeated `X^T (X v)` multiplication.
fn power_iteration(centered: &[Vec<f32>], dimensions: usize, iterations: usize) -> Vec<f32> {
    let mut v = vec![1.0f32 / (dimensions as f32).sqrt(); dimensions];
    for _ in 0..iterations {
        let mut next = vec![0.0f32; dimensions];
        for row in centered {
            let proj: f32 = row.iter().zip(&v).map(|(a, b)| a * b).sum();
            for (n, r) in next.iter_mut().zip(row) {
                *n += proj * r;
            }
        }
        let norm = next.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm < 1e-12 {
            break;
        }
        for n in &mut next {
            *n /= norm;
        }
        v = next;
    }
    v
}

/// Removes the component of `direction` from every row in place, so the
/// next `power_iteration` call converges to the next-largest direction.
fn deflate(centered: &mut [Vec<f32>], direction: &[f32]) {
    for row in centered.iter_mut() {
        let proj: f32 = row.iter().zip(direction).map(|(a, b)| a * b).sum();
        for (r, d) in row.iter_mut().zip(direction) {
            *r -= proj * d;
        }
    }
}

/// Dual-dataset container: a reduced `primary` dataset used for graph
/// traversal and a full-dimensional `secondary` dataset consulted only to
/// rerank the top candidates a search returns (§4.6).
#[derive(Debug, Clone)]
pub struct LeanVecDataset {
    primary: ContiguousDataset<f32>,
    secondary: ContiguousDataset<f32>,
    matrix: ReductionMatrix,
    mode: ReductionMode,
}

impl LeanVecDataset {
    /// Reduces every row of `dataset` to `leading_dimensions`, fitting the
    /// projection per `mode`. `fit_sample` is only consulted when `mode ==
    /// OutOfDistribution`; pass an empty slice for `Pca`.
    ///
    /// # Errors
    /// [`CoreError::Other`] if `leading_dimensions` is zero, exceeds the
    /// dataset's native dimension, or the fit sample required by `mode` is
    /// empty.
    pub fn build<T: Element, D: Dataset<T>>(
        dataset: &D,
        fit_sample: &[Vec<f32>],
        leading_dimensions: usize,
        mode: ReductionMode,
    ) -> CoreResult<Self> {
        let dimensions = dataset.dimensions();
        let n = dataset.size();
        let base_sample: Vec<Vec<f32>> = (0..n)
            .map(|i| vamana_core::element::to_f32_vec(dataset.get_datum(i)))
            .collect();
        let matrix = ReductionMatrix::fit(&base_sample, fit_sample, dimensions, leading_dimensions, mode)?;

        let mut primary = ContiguousDataset::new(leading_dimensions);
        let mut secondary = ContiguousDataset::new(dimensions);
        for row in &base_sample {
            primary.push(&matrix.project(row))?;
            secondary.push(row)?;
        }

        Ok(Self {
            primary,
            secondary,
            matrix,
            mode,
        })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.primary.size()
    }

    #[must_use]
    pub fn leading_dimensions(&self) -> usize {
        self.matrix.leading_dimensions
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.matrix.dimensions
    }

    #[must_use]
    pub fn mode(&self) -> ReductionMode {
        self.mode
    }

    /// The vector graph search should traverse against.
    #[must_use]
    pub fn primary_vector(&self, i: usize) -> &[f32] {
        self.primary.get_datum(i)
    }

    /// The full-fidelity vector used to rerank shortlisted candidates.
    #[must_use]
    pub fn secondary_vector(&self, i: usize) -> &[f32] {
        self.secondary.get_datum(i)
    }

    /// Projects a full-dimensional query into primary (reduced) space, the
    /// representation graph search uses for every hop.
    #[must_use]
    pub fn project_query(&self, query: &[f32]) -> Vec<f32> {
        self.matrix.project(query)
    }

    /// Reranks `candidates` (database indices from a primary-space search)
    /// by exact L2 distance in full-dimensional secondary space, ascending.
    #[must_use]
    pub fn rerank(&self, query: &[f32], candidates: &[usize]) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = candidates
            .iter()
            .map(|&i| {
                let d = vamana_core::distance::L2Distance::compute_pair(query, self.secondary_vector(i));
                (i, d)
            })
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vamana_core::dataset::ContiguousDataset as CD;

    fn correlated_dataset() -> CD<f32> {
        let mut d: CD<f32> = CD::new(4);
        for i in 0..40 {
            let x = i as f32 * 0.1;
            d.push(&[x, 2.0 * x, -x, x * 0.5]).unwrap();
        }
        d
    }

    #[test]
    fn pca_reduces_dimension_and_preserves_size() {
        let dataset = correlated_dataset();
        let lv = LeanVecDataset::build(&dataset, &[], 2, ReductionMode::Pca).unwrap();
        assert_eq!(lv.size(), dataset.size());
        assert_eq!(lv.leading_dimensions(), 2);
        assert_eq!(lv.dimensions(), 4);
        assert_eq!(lv.primary_vector(0).len(), 2);
        assert_eq!(lv.secondary_vector(0).len(), 4);
    }

    #[test]
    fn rejects_leading_dimensions_above_native() {
        let dataset = correlated_dataset();
        assert!(LeanVecDataset::build(&dataset, &[], 8, ReductionMode::Pca).is_err());
    }

    #[test]
    fn ood_mode_requires_nonempty_fit_sample() {
        let dataset = correlated_dataset();
        assert!(LeanVecDataset::build(&dataset, &[], 2, ReductionMode::OutOfDistribution).is_err());
        let fit_sample = vec![vec![1.0, 2.0, 3.0, 4.0]; 8];
        assert!(LeanVecDataset::build(&dataset, &fit_sample, 2, ReductionMode::OutOfDistribution).is_ok());
    }

    #[test]
    fn rerank_returns_ascending_l2_order() {
        let dataset = correlated_dataset();
        let lv = LeanVecDataset::build(&dataset, &[], 2, ReductionMode::Pca).unwrap();
        let query = dataset.get_datum(5).to_vec();
        let candidates: Vec<usize> = (0..dataset.size()).collect();
        let ranked = lv.rerank(&query, &candidates);
        assert_eq!(ranked[0].0, 5);
        for w in ranked.windows(2) {
            assert!(w[0].1 <= w[1].1);
        }
    }

    #[test]
    fn query_projection_matches_dataset_projection_dimension() {
        let dataset = correlated_dataset();
        let lv = LeanVecDataset::build(&dataset, &[], 3, ReductionMode::Pca).unwrap();
        let projected = lv.project_query(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(projected.len(), 3);
    }
}
