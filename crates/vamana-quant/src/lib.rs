//! Vector compression and dimensionality reduction layers for the
//! Vamana/IVF workspace: LVQ (locally-adaptive scalar quantization, one-
//! and two-level) and LeanVec (linear dimensionality reduction with
//! full-fidelity reranking).

pub mod leanvec;
pub mod lvq;

pub use leanvec::{LeanVecDataset, ReductionMode};
pub use lvq::{CentroidTable, LvqL2Query, LvqOneLevelDataset, LvqTwoLevelDataset, PackingStrategy};
