//! The inverted-file (IVF) approximate nearest neighbor index: K-means
//! centroid training, dense clustered storage, two-stage search, and a
//! mutable variant that supports point-level add/delete.
//!
//! - [`kmeans`]: flat and hierarchical minibatch K-means training.
//! - [`clustering`]: post-training nearest-centroid assignment.
//! - [`storage`]: the dense, cluster-contiguous on-heap layout searched
//!   by [`search::IvfIndex`].
//! - [`search::IvfIndex`]: the immutable, build-once index.
//! - [`dynamic::DynamicIvfIndex`]: per-cluster `Vec` storage behind an
//!   ID translator, for workloads that add and delete points over time.

pub mod clustering;
pub mod dynamic;
pub mod kmeans;
pub mod search;
pub mod storage;

pub use clustering::Clustering;
pub use dynamic::DynamicIvfIndex;
pub use kmeans::{flat_kmeans, hierarchical_kmeans, sample_training_indices};
pub use search::{IvfIndex, IvfParams};
pub use storage::DenseClusteredDataset;
