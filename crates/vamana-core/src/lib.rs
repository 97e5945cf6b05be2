//! Primitives shared across the Vamana/IVF approximate nearest neighbor
//! search workspace: numeric element types, the dataset and graph storage
//! abstractions, distance functors, the search buffer, a pluggable thread
//! pool, ID management, and the on-disk manifest/blob formats.

pub mod dataset;
pub mod distance;
pub mod element;
pub mod error;
pub mod graph;
pub mod ids;
pub mod legacy;
pub mod manifest;
pub mod medoid;
pub mod search_buffer;
pub mod threadpool;

pub use dataset::{Accessor, BlockedDataset, ContiguousDataset, Dataset, IdentityAccessor, MutableDataset};
pub use distance::{AnyDistance, CosineDistance, DistanceFunctor, DistanceKind, DistanceOrder, IpDistance, L2Distance};
pub use element::Element;
pub use error::{CoreError, CoreResult};
pub use graph::{BlockedGraph, FixedDegreeGraph, Graph};
pub use ids::{DatasetUuid, ExternalId, IdTranslator, InternalId, ManifestUuid};
pub use manifest::{BlobHeader, CompatibilityMatrix, ManifestObject, SchemaVersion};
pub use search_buffer::{BufferEntry, SearchBuffer};
pub use threadpool::{Partition, ThreadPoolHandle};

/// A query cancellation predicate, polled at loop-level granularity by
/// every long-running search-path function (§5).
pub type CancelPredicate<'a> = &'a dyn Fn() -> bool;

/// The predicate that never cancels — the default for callers that don't
/// need it.
#[must_use]
pub fn never_cancel() -> bool {
    false
}
