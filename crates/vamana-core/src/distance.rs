//! Distance functors: L2, inner product, and cosine, plus the stateful
//! "fix-argument" protocol used to amortize query-side precomputation
//! across many `compute` calls against the same query.

use std::cmp::Ordering;

/// The three canonical distances. `Cosine` is specified as normalized IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DistanceKind {
    L2,
    Ip,
    Cosine,
}

/// Ordering predicate for comparing two scores under a given distance:
/// smaller is closer for L2, larger is closer for IP/Cosine.
pub trait DistanceOrder {
    /// Returns `true` if `a` is strictly closer than `b`.
    fn closer(&self, a: f32, b: f32) -> bool;

    /// `Ordering` such that the minimum element is the closest.
    fn compare(&self, a: f32, b: f32) -> Ordering;
}

impl DistanceOrder for DistanceKind {
    fn closer(&self, a: f32, b: f32) -> bool {
        match self {
            DistanceKind::L2 => a < b,
            DistanceKind::Ip | DistanceKind::Cosine => a > b,
        }
    }

    fn compare(&self, a: f32, b: f32) -> Ordering {
        match self {
            DistanceKind::L2 => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            DistanceKind::Ip | DistanceKind::Cosine => {
                b.partial_cmp(&a).unwrap_or(Ordering::Equal)
            }
        }
    }
}

/// A pairwise distance functor over two equal-length vector views.
///
/// `fix_argument` is the stateful-distance protocol (§4.1): when a functor
/// is "fixed" to a query, later `compute` calls only need the database-side
/// vector. Functors that have no useful query-side precomputation may
/// implement `fix_argument` as a no-op that simply stores the query.
pub trait DistanceFunctor: Clone {
    /// Precomputes query-side invariants for `query`, returning a functor
    /// specialized to it.
    fn fix_argument(&self, query: &[f32]) -> Self;

    /// Computes the distance between the fixed query and `database_vector`.
    fn compute(&self, database_vector: &[f32]) -> f32;

    fn kind(&self) -> DistanceKind;
}

#[derive(Debug, Clone, Default)]
pub struct L2Distance {
    query: Vec<f32>,
}

impl L2Distance {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn compute_pair(a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    }
}

impl DistanceFunctor for L2Distance {
    fn fix_argument(&self, query: &[f32]) -> Self {
        Self {
            query: query.to_vec(),
        }
    }

    fn compute(&self, database_vector: &[f32]) -> f32 {
        Self::compute_pair(&self.query, database_vector)
    }

    fn kind(&self) -> DistanceKind {
        DistanceKind::L2
    }
}

#[derive(Debug, Clone, Default)]
pub struct IpDistance {
    query: Vec<f32>,
}

impl IpDistance {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn compute_pair(a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        // Negated so that "larger raw dot product" still means "smaller
        // returned score is closer" is NOT assumed anywhere upstream;
        // ordering is handled exclusively via `DistanceOrder`, so this
        // returns the *raw* inner product (larger is closer, per spec).
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }
}

impl DistanceFunctor for IpDistance {
    fn fix_argument(&self, query: &[f32]) -> Self {
        Self {
            query: query.to_vec(),
        }
    }

    fn compute(&self, database_vector: &[f32]) -> f32 {
        Self::compute_pair(&self.query, database_vector)
    }

    fn kind(&self) -> DistanceKind {
        DistanceKind::Ip
    }
}

#[derive(Debug, Clone, Default)]
pub struct CosineDistance {
    query_normalized: Vec<f32>,
}

impl CosineDistance {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(v: &[f32]) -> Vec<f32> {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            v.to_vec()
        } else {
            v.iter().map(|x| x / norm).collect()
        }
    }
}

impl DistanceFunctor for CosineDistance {
    fn fix_argument(&self, query: &[f32]) -> Self {
        Self {
            query_normalized: Self::normalize(query),
        }
    }

    fn compute(&self, database_vector: &[f32]) -> f32 {
        let db_norm = database_vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if db_norm == 0.0 {
            return 0.0;
        }
        let dot: f32 = self
            .query_normalized
            .iter()
            .zip(database_vector)
            .map(|(x, y)| x * y)
            .sum();
        dot / db_norm
    }

    fn kind(&self) -> DistanceKind {
        DistanceKind::Cosine
    }
}

/// A trait-object-friendly wrapper so higher layers (graph search, builder)
/// can be generic over "some distance" without monomorphizing per variant.
#[derive(Debug, Clone)]
pub enum AnyDistance {
    L2(L2Distance),
    Ip(IpDistance),
    Cosine(CosineDistance),
}

impl AnyDistance {
    #[must_use]
    pub fn new(kind: DistanceKind) -> Self {
        match kind {
            DistanceKind::L2 => Self::L2(L2Distance::new()),
            DistanceKind::Ip => Self::Ip(IpDistance::new()),
            DistanceKind::Cosine => Self::Cosine(CosineDistance::new()),
        }
    }

    #[must_use]
    pub fn fix_argument(&self, query: &[f32]) -> Self {
        match self {
            Self::L2(d) => Self::L2(d.fix_argument(query)),
            Self::Ip(d) => Self::Ip(d.fix_argument(query)),
            Self::Cosine(d) => Self::Cosine(d.fix_argument(query)),
        }
    }

    #[must_use]
    pub fn compute(&self, database_vector: &[f32]) -> f32 {
        match self {
            Self::L2(d) => d.compute(database_vector),
            Self::Ip(d) => d.compute(database_vector),
            Self::Cosine(d) => d.compute(database_vector),
        }
    }

    #[must_use]
    pub fn kind(&self) -> DistanceKind {
        match self {
            Self::L2(_) => DistanceKind::L2,
            Self::Ip(_) => DistanceKind::Ip,
            Self::Cosine(_) => DistanceKind::Cosine,
        }
    }

    #[must_use]
    pub fn closer(&self, a: f32, b: f32) -> bool {
        self.kind().closer(a, b)
    }

    #[must_use]
    pub fn compare(&self, a: f32, b: f32) -> Ordering {
        self.kind().compare(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_identical_vectors_zero() {
        let d = L2Distance::new().fix_argument(&[1.0, 2.0, 3.0]);
        assert_eq!(d.compute(&[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn l2_orders_ascending() {
        assert!(DistanceKind::L2.closer(1.0, 2.0));
        assert!(!DistanceKind::L2.closer(2.0, 1.0));
    }

    #[test]
    fn ip_orders_descending() {
        assert!(DistanceKind::Ip.closer(2.0, 1.0));
        assert!(!DistanceKind::Ip.closer(1.0, 2.0));
    }

    #[test]
    fn cosine_identical_direction_is_one() {
        let d = CosineDistance::new().fix_argument(&[1.0, 0.0]);
        let score = d.compute(&[2.0, 0.0]);
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        let d = CosineDistance::new().fix_argument(&[1.0, 0.0]);
        let score = d.compute(&[0.0, 5.0]);
        assert!(score.abs() < 1e-6);
    }
}
