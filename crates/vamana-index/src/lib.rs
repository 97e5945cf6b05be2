//! The Vamana disk-graph approximate nearest neighbor index.
//!
//! - [`static_index::VamanaIndex`]: immutable graph built once over a
//!   fixed dataset, with search, reconstruction, and persistence.
//! - [`dynamic_index::DynamicVamanaIndex`]: mutable variant supporting
//!   `add_points`/`delete_entries`/`consolidate`/`compact` behind a
//!   caller-chosen external ID space.
//! - [`batch_iterator::BatchIterator`]: resumable "next k results"
//!   retrieval over a single query without restarting the search.
//! - [`calibration`]: binary search over search window size to meet a
//!   target recall, plus prefetch parameter training.
//! - [`builder`] and [`greedy_search`]: the construction and traversal
//!   primitives the two index types are built from.

pub mod batch_iterator;
pub mod builder;
pub mod calibration;
pub mod dynamic_index;
pub mod greedy_search;
pub mod simd;
pub mod static_index;

pub use batch_iterator::BatchIterator;
pub use builder::BuildParams;
pub use calibration::{calibrate, train_prefetch, CalibrationResult};
pub use dynamic_index::DynamicVamanaIndex;
pub use greedy_search::{greedy_search, PrefetchConfig};
pub use static_index::{PrimaryStorage, VamanaIndex, VamanaParams};
