//! The static Vamana index (§4.7): an immutable graph and dataset pair
//! supporting greedy search, reconstruction, persistence, and
//! calibration. Construction delegates to [`crate::builder`]; querying
//! delegates to [`crate::greedy_search`].

use std::borrow::Cow;
use std::fs;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vamana_core::dataset::{ContiguousDataset, Dataset, MutableDataset};
use vamana_core::distance::{AnyDistance, DistanceKind};
use vamana_core::element::Element;
use vamana_core::error::{CoreError, CoreResult};
use vamana_core::graph::{FixedDegreeGraph, Graph};
use vamana_core::manifest::{
    BlobHeader, CompatibilityMatrix, ManifestObject, SchemaVersion,
};
use vamana_core::search_buffer::SearchBuffer;
use vamana_core::threadpool::ThreadPoolHandle;
use vamana_core::{BufferEntry, CancelPredicate};

use vamana_quant::{LeanVecDataset, LvqOneLevelDataset, LvqTwoLevelDataset};

use crate::builder::{self, BuildParams};
use crate::greedy_search::{greedy_search, PrefetchConfig};

const SCHEMA_TAG: &str = "vamana_index_parameters";
const GRAPH_BLOB_NAME: &str = "graph.bin";
const DATA_BLOB_NAME: &str = "data.bin";

fn compatibility() -> CompatibilityMatrix {
    CompatibilityMatrix::new().register(
        SCHEMA_TAG,
        SchemaVersion::new(1, 0, 0),
        SchemaVersion::new(1, 0, 0),
    )
}

/// Search and construction parameters (§4.7/§4.9 getters/setters surface).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VamanaParams {
    pub search_window_size: usize,
    pub total_capacity: usize,
    pub construction_search_window_size: usize,
    pub max_candidate_pool_size: usize,
    pub graph_max_degree: usize,
    pub prune_to: usize,
    pub alpha: f32,
    pub use_visited_set: bool,
    pub full_search_history: bool,
    pub prefetch_step: usize,
    pub prefetch_offset: usize,
}

impl Default for VamanaParams {
    fn default() -> Self {
        Self {
            search_window_size: 100,
            total_capacity: 100,
            construction_search_window_size: 100,
            max_candidate_pool_size: 128,
            graph_max_degree: 64,
            prune_to: 64,
            alpha: 1.2,
            use_visited_set: true,
            full_search_history: false,
            prefetch_step: 4,
            prefetch_offset: 2,
        }
    }
}

impl VamanaParams {
    pub(crate) fn build_params(&self) -> BuildParams {
        BuildParams {
            graph_max_degree: self.graph_max_degree,
            max_candidate_pool_size: self.max_candidate_pool_size,
            alpha: self.alpha,
            prune_to: self.prune_to,
            construction_search_window_size: self.construction_search_window_size,
            full_search_history: self.full_search_history,
        }
    }

    pub(crate) fn prefetch(&self) -> PrefetchConfig {
        PrefetchConfig {
            step: self.prefetch_step,
            offset: self.prefetch_offset,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexManifestPayload {
    dimensions: usize,
    size: usize,
    distance_kind: DistanceKind,
    entry_point: usize,
    params: VamanaParams,
    data_uuid: Uuid,
    degrees: Vec<u32>,
}

/// The index's primary dataset slot (§4.6/§4.7). The graph is always
/// traversed against whatever [`PrimaryStorage::primary_vector`] returns;
/// `LvqTwoLevel` and `LeanVec` additionally carry a higher-fidelity view
/// that [`VamanaIndex::search`] uses to rerank the shortlisted top-k once
/// the graph walk is done, matching the split-buffer calibration strategy
/// in §4.9.
pub enum PrimaryStorage<T: Element> {
    /// Full-precision, uncompressed storage. Supports reconstruction,
    /// in-place updates, and the binary save/load format.
    Raw(ContiguousDataset<T>),
    /// One-level LVQ: a single compressed view, no reranking (§8
    /// scenario 3).
    LvqOneLevel(LvqOneLevelDataset),
    /// Two-level LVQ: the one-level reconstruction drives graph search,
    /// the residual-corrected reconstruction reranks the final top-k
    /// (§8 scenario 4).
    LvqTwoLevel(LvqTwoLevelDataset),
    /// LeanVec: a dimension-reduced primary dataset drives graph search,
    /// the full-dimensional secondary dataset reranks the final top-k
    /// (§4.6).
    LeanVec(LeanVecDataset),
}

impl<T: Element> PrimaryStorage<T> {
    fn size(&self) -> usize {
        match self {
            PrimaryStorage::Raw(d) => d.size(),
            PrimaryStorage::LvqOneLevel(d) => d.size(),
            PrimaryStorage::LvqTwoLevel(d) => d.size(),
            PrimaryStorage::LeanVec(d) => d.size(),
        }
    }

    /// The dimensionality queries, reconstruction, and rerank targets are
    /// expressed in (the dataset's own native space, not the possibly
    /// reduced space graph traversal happens in).
    fn native_dimensions(&self) -> usize {
        match self {
            PrimaryStorage::Raw(d) => d.dimensions(),
            PrimaryStorage::LvqOneLevel(d) => d.dimensions(),
            PrimaryStorage::LvqTwoLevel(d) => d.dimensions(),
            PrimaryStorage::LeanVec(d) => d.dimensions(),
        }
    }

    fn uses_reranking(&self) -> bool {
        matches!(self, PrimaryStorage::LvqTwoLevel(_) | PrimaryStorage::LeanVec(_))
    }

    /// Projects an incoming full-dimensional query into whatever space
    /// graph traversal runs in. The identity for every variant except
    /// `LeanVec`, which traverses a reduced-dimension primary dataset.
    fn query_for_search<'q>(&self, query: &'q [f32]) -> Cow<'q, [f32]> {
        match self {
            PrimaryStorage::LeanVec(d) => Cow::Owned(d.project_query(query)),
            _ => Cow::Borrowed(query),
        }
    }

    /// The vector graph traversal scores against.
    fn primary_vector(&self, i: usize) -> Cow<'_, [f32]> {
        match self {
            PrimaryStorage::Raw(d) => Cow::Owned(vamana_core::element::to_f32_vec(d.get_datum(i))),
            PrimaryStorage::LvqOneLevel(d) => Cow::Owned(d.reconstruct(i)),
            PrimaryStorage::LvqTwoLevel(d) => Cow::Owned(d.primary_reconstruct(i)),
            PrimaryStorage::LeanVec(d) => Cow::Borrowed(d.primary_vector(i)),
        }
    }

    /// The full-fidelity vector used to rerank candidate `i`, or `None`
    /// when this storage has nothing better than the primary view.
    fn rerank_vector(&self, i: usize) -> Option<Cow<'_, [f32]>> {
        match self {
            PrimaryStorage::LvqTwoLevel(d) => Some(Cow::Owned(d.reconstruct(i))),
            PrimaryStorage::LeanVec(d) => Some(Cow::Borrowed(d.secondary_vector(i))),
            _ => None,
        }
    }

    fn as_raw(&self) -> CoreResult<&ContiguousDataset<T>> {
        match self {
            PrimaryStorage::Raw(d) => Ok(d),
            _ => Err(CoreError::invalid_state(
                "operation requires an uncompressed (Raw) primary dataset",
            )),
        }
    }

    fn as_raw_mut(&mut self) -> CoreResult<&mut ContiguousDataset<T>> {
        match self {
            PrimaryStorage::Raw(d) => Ok(d),
            _ => Err(CoreError::invalid_state(
                "operation requires an uncompressed (Raw) primary dataset",
            )),
        }
    }
}

/// Approximates the medoid over whatever space `vector_at` exposes,
/// mirroring [`vamana_core::medoid::approximate_medoid`] but over a
/// closure rather than a `Dataset<T>` impl, since [`PrimaryStorage`]'s
/// compressed variants aren't `T`-typed datasets.
fn approximate_medoid_over(
    n: usize,
    sample_size: usize,
    seed: u64,
    vector_at: &dyn Fn(usize) -> Cow<'_, [f32]>,
) -> usize {
    if n == 0 {
        return 0;
    }
    let sample_size = sample_size.min(n);
    let mut indices: Vec<usize> = (0..n).collect();
    if sample_size < n {
        use rand::seq::SliceRandom;
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);
    }
    let sample = &indices[..sample_size];

    let mut best_idx = sample[0];
    let mut best_sum = f32::MAX;
    for &i in sample {
        let vi = vector_at(i);
        let mut sum = 0.0f32;
        for &j in sample {
            let vj = vector_at(j);
            sum += vi.iter().zip(vj.iter()).map(|(a, b)| (a - b) * (a - b)).sum::<f32>();
        }
        if sum < best_sum {
            best_sum = sum;
            best_idx = i;
        }
    }
    best_idx
}

/// An immutable Vamana graph over a fixed primary dataset (§4.7). The
/// primary dataset slot is [`PrimaryStorage`], so LVQ- and LeanVec-
/// compressed datasets (`vamana-quant`) drive the same graph traversal
/// and search-buffer machinery as a raw, uncompressed dataset; variants
/// that carry a higher-fidelity secondary view rerank the final top-k
/// after the graph walk completes (§4.6).
pub struct VamanaIndex<T: Element> {
    dataset: PrimaryStorage<T>,
    graph: FixedDegreeGraph,
    entry_point: usize,
    distance_kind: DistanceKind,
    params: VamanaParams,
    thread_pool: ThreadPoolHandle,
}

impl<T: Element> VamanaIndex<T> {
    /// Builds a fresh index over a raw, uncompressed `dataset`, running
    /// the two-sweep α-rule construction described in §4.4.
    ///
    /// # Errors
    /// [`CoreError::InvalidState`] if `dataset` is empty.
    pub fn build(
        dataset: ContiguousDataset<T>,
        distance_kind: DistanceKind,
        params: VamanaParams,
        thread_pool: ThreadPoolHandle,
        seed: u64,
    ) -> CoreResult<Self> {
        Self::build_storage(PrimaryStorage::Raw(dataset), distance_kind, params, thread_pool, seed)
    }

    /// Builds a fresh index over an arbitrary [`PrimaryStorage`] -- raw,
    /// LVQ one-/two-level, or LeanVec -- running the same two-sweep
    /// α-rule construction against whichever vectors `dataset` exposes as
    /// its primary (graph-search) view.
    ///
    /// # Errors
    /// [`CoreError::InvalidState`] if `dataset` is empty.
    pub fn build_storage(
        dataset: PrimaryStorage<T>,
        distance_kind: DistanceKind,
        params: VamanaParams,
        thread_pool: ThreadPoolHandle,
        seed: u64,
    ) -> CoreResult<Self> {
        let size = dataset.size();
        if size == 0 {
            return Err(CoreError::invalid_state("cannot build an index over an empty dataset"));
        }
        let primary_at = |i: usize| dataset.primary_vector(i);
        let entry_point = approximate_medoid_over(size, size.min(4096), seed, &primary_at);
        let mut graph = FixedDegreeGraph::new(size, params.graph_max_degree);
        let vector_at = |i: usize| dataset.primary_vector(i).into_owned();
        builder::build_graph(
            size,
            &vector_at,
            distance_kind,
            &mut graph,
            &params.build_params(),
            &thread_pool,
            entry_point,
            seed,
        )?;
        tracing::info!(size, entry_point, "built static vamana index");
        Ok(Self {
            dataset,
            graph,
            entry_point,
            distance_kind,
            params,
            thread_pool,
        })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.dataset.size()
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dataset.native_dimensions()
    }

    #[must_use]
    pub fn params(&self) -> &VamanaParams {
        &self.params
    }

    pub fn set_params(&mut self, params: VamanaParams) {
        self.params = params;
    }

    #[must_use]
    pub fn thread_pool(&self) -> &ThreadPoolHandle {
        &self.thread_pool
    }

    /// Whether this index's primary storage declares a reranking pass
    /// (§4.6/§4.9 step 2's extension predicate). Consulted by
    /// [`crate::calibration::calibrate`] to decide whether to try a
    /// split search buffer.
    #[must_use]
    pub fn uses_reranking(&self) -> bool {
        self.dataset.uses_reranking()
    }

    /// Allocates a scratch buffer matching the index's current search
    /// parameters, for callers that want to drive concurrent searches
    /// each with their own buffer (§5: search is concurrency-safe with
    /// per-thread scratch space).
    #[must_use]
    pub fn scratchspace(&self) -> SearchBuffer {
        SearchBuffer::split(
            self.distance_kind,
            self.params.search_window_size,
            self.params.total_capacity,
            self.params.use_visited_set,
        )
    }

    pub(crate) fn distance_kind_for_batch_iterator(&self) -> DistanceKind {
        self.distance_kind
    }

    pub(crate) fn entry_point_for_batch_iterator(&self) -> usize {
        self.entry_point
    }

    pub(crate) fn graph_for_batch_iterator(&self) -> &dyn Graph {
        &self.graph
    }

    pub(crate) fn primary_vector_for_batch_iterator(&self, i: usize) -> Cow<'_, [f32]> {
        self.dataset.primary_vector(i)
    }

    fn vector_at(&self, i: u32) -> Cow<'_, [f32]> {
        self.dataset.primary_vector(i as usize)
    }

    /// Runs one search, allocating its own scratch buffer.
    #[must_use]
    pub fn search(&self, query: &[f32], k: usize, cancel: CancelPredicate<'_>) -> Vec<BufferEntry> {
        let mut scratch = self.scratchspace();
        self.search_with_scratch(query, &mut scratch, cancel);
        self.rerank_if_needed(query, &mut scratch);
        scratch.top_k(k).to_vec()
    }

    /// Runs one search with an ad hoc window/capacity instead of the
    /// index's configured parameters, used by [`crate::calibration`] to
    /// probe candidate window/capacity combinations without mutating
    /// `self`.
    #[must_use]
    pub fn search_with_window(
        &self,
        query: &[f32],
        window: usize,
        capacity: usize,
        k: usize,
        cancel: CancelPredicate<'_>,
    ) -> Vec<BufferEntry> {
        self.search_with_settings(query, window, capacity, k, self.params.prefetch(), cancel)
    }

    /// As [`Self::search_with_window`], but also overriding the prefetch
    /// `(step, offset)` bookkeeping instead of using the index's
    /// configured setting, used by [`crate::calibration::train_prefetch`]
    /// to actually measure each candidate rather than the fixed default.
    #[must_use]
    pub fn search_with_settings(
        &self,
        query: &[f32],
        window: usize,
        capacity: usize,
        k: usize,
        prefetch: PrefetchConfig,
        cancel: CancelPredicate<'_>,
    ) -> Vec<BufferEntry> {
        let mut scratch = SearchBuffer::split(self.distance_kind, window, capacity.max(window), self.params.use_visited_set);
        self.run_search(query, &mut scratch, prefetch, cancel);
        self.rerank_if_needed(query, &mut scratch);
        scratch.top_k(k).to_vec()
    }

    /// Runs one search using caller-provided scratch space, letting a
    /// caller driving many concurrent queries avoid reallocating a
    /// buffer per call. Does not rerank; callers that need the
    /// reranked top-k should call [`Self::search`] or
    /// [`Self::search_with_window`] instead.
    pub fn search_with_scratch(&self, query: &[f32], scratch: &mut SearchBuffer, cancel: CancelPredicate<'_>) {
        self.run_search(query, scratch, self.params.prefetch(), cancel);
    }

    fn run_search(&self, query: &[f32], scratch: &mut SearchBuffer, prefetch: PrefetchConfig, cancel: CancelPredicate<'_>) {
        let projected = self.dataset.query_for_search(query);
        let distance = AnyDistance::new(self.distance_kind).fix_argument(&projected);
        let vector_at = |i: u32| self.vector_at(i);
        greedy_search(
            &self.graph,
            &vector_at,
            &distance,
            scratch,
            &[self.entry_point as u32],
            prefetch,
            cancel,
        );
    }

    /// Rescores every candidate currently held in `scratch` (up to its
    /// full `total_capacity`, not just the final `k`) against the
    /// full-fidelity secondary view when the primary storage declares
    /// one (§4.6), via [`SearchBuffer::rescore`] -- exactly the split-
    /// buffer reranking hook that type exists for. A no-op otherwise.
    fn rerank_if_needed(&self, query: &[f32], scratch: &mut SearchBuffer) {
        if !self.dataset.uses_reranking() {
            return;
        }
        let ids: Vec<u32> = scratch.entries().iter().map(|e| e.id).collect();
        for id in ids {
            if let Some(full) = self.dataset.rerank_vector(id as usize) {
                let distance = builder::raw_distance(self.distance_kind, query, &full);
                scratch.rescore(id, distance);
            }
        }
    }

    /// Copies the raw vectors for `ids` into `dst`, row-major. Leaves
    /// `dst` entirely untouched if any id is out of range (§4.7
    /// all-or-nothing contract). Only defined for a `Raw` primary
    /// dataset; compressed/reduced storage has no exact `T`-typed
    /// representation to return.
    ///
    /// # Errors
    /// [`CoreError::InvalidState`] if the primary dataset isn't `Raw`,
    /// [`CoreError::OutOfRangeId`] if any id is `>= self.size()`, or
    /// [`CoreError::DimensionMismatch`] if `dst.len()` doesn't match
    /// `ids.len() * self.dimensions()`.
    pub fn reconstruct_at(&self, dst: &mut [T], ids: &[u32]) -> CoreResult<()> {
        let raw = self.dataset.as_raw()?;
        let dims = self.dimensions();
        if dst.len() != ids.len() * dims {
            return Err(CoreError::DimensionMismatch {
                expected: ids.len() * dims,
                found: dst.len(),
            });
        }
        for &id in ids {
            if id as usize >= self.size() {
                return Err(CoreError::out_of_range(u64::from(id), self.size()));
            }
        }
        for (row, &id) in ids.iter().enumerate() {
            let v = raw.get_datum(id as usize);
            dst[row * dims..(row + 1) * dims].copy_from_slice(v);
        }
        Ok(())
    }

    /// Replaces vector `id`'s stored value in place, leaving the graph
    /// topology untouched (used by calibration's prefetch training and
    /// by callers correcting individually mis-ingested rows). Only
    /// defined for a `Raw` primary dataset.
    ///
    /// # Errors
    /// [`CoreError::InvalidState`] if the primary dataset isn't `Raw`, or
    /// [`CoreError::DimensionMismatch`] if `v.len() != self.dimensions()`.
    pub fn update_vector(&mut self, id: usize, v: &[T]) -> CoreResult<()> {
        self.dataset.as_raw_mut()?.set_datum(id, v)
    }

    /// Persists the index to `dir` as a manifest plus two binary blobs.
    /// Only defined for a `Raw` primary dataset.
    ///
    /// # Errors
    /// [`CoreError::InvalidState`] if the primary dataset isn't `Raw`, or
    /// [`CoreError::Io`] / [`CoreError::ManifestSerialize`] on failure.
    pub fn save(&self, dir: &Path) -> CoreResult<()> {
        let raw = self.dataset.as_raw()?;
        fs::create_dir_all(dir)?;
        let data_uuid = Uuid::now_v7();

        let data_path = dir.join(DATA_BLOB_NAME);
        let mut writer = BufWriter::new(File::create(&data_path)?);
        let header = BlobHeader::new(data_uuid, self.size() as u64, self.dimensions() as u64);
        header.write(&mut writer)?;
        let elem_size = T::SIZE;
        let mut row_buf = vec![0u8; self.dimensions() * elem_size];
        for i in 0..self.size() {
            let row = raw.get_datum(i);
            for (col, value) in row.iter().enumerate() {
                value.write_le(&mut row_buf[col * elem_size..(col + 1) * elem_size]);
            }
            std::io::Write::write_all(&mut writer, &row_buf)?;
        }

        let graph_path = dir.join(GRAPH_BLOB_NAME);
        let mut writer = BufWriter::new(File::create(&graph_path)?);
        let graph_header = BlobHeader::new(Uuid::now_v7(), self.graph.num_nodes() as u64, self.graph.max_degree() as u64);
        graph_header.write(&mut writer)?;
        let mut neighbor_buf = vec![0u8; self.graph.max_degree() * 4];
        for i in 0..self.graph.num_nodes() {
            neighbor_buf.fill(0);
            for (col, &n) in self.graph.get_node(i).iter().enumerate() {
                neighbor_buf[col * 4..col * 4 + 4].copy_from_slice(&n.to_le_bytes());
            }
            std::io::Write::write_all(&mut writer, &neighbor_buf)?;
        }

        let degrees: Vec<u32> = (0..self.graph.num_nodes())
            .map(|i| self.graph.get_node_degree(i) as u32)
            .collect();

        let payload = IndexManifestPayload {
            dimensions: self.dimensions(),
            size: self.size(),
            distance_kind: self.distance_kind,
            entry_point: self.entry_point,
            params: self.params.clone(),
            data_uuid,
            degrees,
        };
        let object = ManifestObject {
            schema: SCHEMA_TAG.to_string(),
            version: "1.0.0".to_string(),
            payload,
        };
        vamana_core::manifest::write_manifest(dir, &object)?;
        Ok(())
    }

    /// Loads an index previously written by [`VamanaIndex::save`]. The
    /// loaded index always has a `Raw` primary dataset.
    ///
    /// # Errors
    /// [`CoreError::SchemaMismatch`] / [`CoreError::MagicMismatch`] /
    /// [`CoreError::Io`] on a malformed or incompatible directory.
    pub fn load(dir: &Path, thread_pool: ThreadPoolHandle) -> CoreResult<Self> {
        let object: ManifestObject<IndexManifestPayload> = vamana_core::manifest::read_manifest(dir)?;
        let version: SchemaVersion = object.version.parse()?;
        compatibility().check(&object.schema, version)?;
        let payload = object.payload;

        let data_path = dir.join(DATA_BLOB_NAME);
        let mut reader = BufReader::new(File::open(&data_path)?);
        let header = BlobHeader::read(&mut reader)?;
        if header.uuid != payload.data_uuid {
            return Err(CoreError::UuidNotFound(payload.data_uuid));
        }
        if header.dimensions_per_vector as usize != payload.dimensions {
            return Err(CoreError::DimensionMismatch {
                expected: payload.dimensions,
                found: header.dimensions_per_vector as usize,
            });
        }
        let elem_size = T::SIZE;
        let mut dataset: ContiguousDataset<T> = ContiguousDataset::new(payload.dimensions);
        let mut row_buf = vec![0u8; payload.dimensions * elem_size];
        for _ in 0..header.num_vectors {
            std::io::Read::read_exact(&mut reader, &mut row_buf)?;
            let row: Vec<T> = row_buf
                .chunks_exact(elem_size)
                .map(T::read_le)
                .collect();
            dataset.push(&row)?;
        }

        let graph_path = dir.join(GRAPH_BLOB_NAME);
        let mut reader = BufReader::new(File::open(&graph_path)?);
        let graph_header = BlobHeader::read(&mut reader)?;
        let max_degree = graph_header.dimensions_per_vector as usize;
        let mut graph = FixedDegreeGraph::new(graph_header.num_vectors as usize, max_degree);
        let mut neighbor_buf = vec![0u8; max_degree * 4];
        for (i, &degree) in payload.degrees.iter().enumerate() {
            std::io::Read::read_exact(&mut reader, &mut neighbor_buf)?;
            let neighbors: Vec<u32> = neighbor_buf[..degree as usize * 4]
                .chunks_exact(4)
                .map(|b| u32::from_le_bytes(b.try_into().expect("4 bytes")))
                .collect();
            graph.replace_node(i, &neighbors);
        }

        Ok(Self {
            dataset: PrimaryStorage::Raw(dataset),
            graph,
            entry_point: payload.entry_point,
            distance_kind: payload.distance_kind,
            params: payload.params,
            thread_pool,
        })
    }

    /// Delegates to [`crate::calibration::calibrate`] to pick a search
    /// window size (and, for reranking datasets, a total capacity for a
    /// split search buffer) meeting `target_recall` against
    /// `ground_truth`, updating `self.params` in place. If the search
    /// range is exhausted without meeting the target, the best window
    /// found is still applied; check the returned flag to distinguish
    /// the two outcomes.
    ///
    /// # Errors
    /// Propagates any error from the underlying search calls.
    pub fn calibrate(
        &mut self,
        queries: &[Vec<f32>],
        ground_truth: &[Vec<u32>],
        target_recall: f64,
        k: usize,
    ) -> CoreResult<bool> {
        let result = crate::calibration::calibrate(self, queries, ground_truth, target_recall, k)?;
        self.params.search_window_size = result.search_window_size;
        self.params.total_capacity = result.total_capacity;
        Ok(result.converged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vamana_core::never_cancel;
    use vamana_quant::lvq::{CentroidTable, PackingStrategy};

    fn ring_dataset(n: usize) -> ContiguousDataset<f32> {
        let mut d = ContiguousDataset::new(2);
        for i in 0..n {
            let theta = (i as f32) * std::f32::consts::TAU / n as f32;
            d.push(&[theta.cos(), theta.sin()]).unwrap();
        }
        d
    }

    fn small_params() -> VamanaParams {
        VamanaParams {
            graph_max_degree: 8,
            prune_to: 8,
            max_candidate_pool_size: 16,
            construction_search_window_size: 16,
            search_window_size: 16,
            total_capacity: 16,
            ..VamanaParams::default()
        }
    }

    #[test]
    fn search_finds_self_for_indexed_vector() {
        let dataset = ring_dataset(30);
        let index = VamanaIndex::build(dataset, DistanceKind::L2, small_params(), ThreadPoolHandle::sequential(), 7).unwrap();
        let query = vamana_core::element::to_f32_vec(index.dataset.as_raw().unwrap().get_datum(5));
        let results = index.search(&query, 1, &never_cancel);
        assert_eq!(results[0].id, 5);
    }

    #[test]
    fn reconstruct_at_is_all_or_nothing_on_bad_id() {
        let dataset = ring_dataset(10);
        let params = VamanaParams {
            graph_max_degree: 4,
            prune_to: 4,
            max_candidate_pool_size: 8,
            construction_search_window_size: 8,
            search_window_size: 8,
            total_capacity: 8,
            ..VamanaParams::default()
        };
        let index = VamanaIndex::build(dataset, DistanceKind::L2, params, ThreadPoolHandle::sequential(), 1).unwrap();
        let mut dst = vec![0.0f32; 4];
        let err = index.reconstruct_at(&mut dst, &[0, 9999]).unwrap_err();
        assert!(matches!(err, CoreError::OutOfRangeId { .. }));
        assert_eq!(dst, vec![0.0; 4]);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = ring_dataset(16);
        let params = VamanaParams {
            graph_max_degree: 4,
            prune_to: 4,
            max_candidate_pool_size: 8,
            construction_search_window_size: 8,
            search_window_size: 8,
            total_capacity: 8,
            ..VamanaParams::default()
        };
        let index = VamanaIndex::build(dataset, DistanceKind::L2, params, ThreadPoolHandle::sequential(), 3).unwrap();
        index.save(dir.path()).unwrap();
        let loaded: VamanaIndex<f32> = VamanaIndex::load(dir.path(), ThreadPoolHandle::sequential()).unwrap();
        assert_eq!(loaded.size(), 16);
        assert_eq!(loaded.dimensions(), 2);
        let query = vec![1.0f32, 0.0];
        let results = loaded.search(&query, 3, &never_cancel);
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn lvq_one_level_storage_has_no_reranking() {
        let dataset = ring_dataset(24);
        let centroids = CentroidTable::global(&dataset).unwrap();
        let lvq = LvqOneLevelDataset::encode(&dataset, centroids, 8, PackingStrategy::Sequential).unwrap();
        let index: VamanaIndex<f32> = VamanaIndex::build_storage(
            PrimaryStorage::LvqOneLevel(lvq),
            DistanceKind::L2,
            small_params(),
            ThreadPoolHandle::sequential(),
            9,
        )
        .unwrap();
        assert!(!index.uses_reranking());
        let results = index.search(&[1.0, 0.0], 3, &never_cancel);
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn lvq_two_level_storage_reranks_top_k() {
        let dataset = ring_dataset(24);
        let centroids = CentroidTable::global(&dataset).unwrap();
        let lvq = LvqTwoLevelDataset::encode(&dataset, centroids, 4, 8, PackingStrategy::Sequential).unwrap();
        let index: VamanaIndex<f32> = VamanaIndex::build_storage(
            PrimaryStorage::LvqTwoLevel(lvq),
            DistanceKind::L2,
            small_params(),
            ThreadPoolHandle::sequential(),
            9,
        )
        .unwrap();
        assert!(index.uses_reranking());
        let results = index.search(&[1.0, 0.0], 3, &never_cancel);
        assert_eq!(results.len(), 3);
        for w in results.windows(2) {
            assert!(w[0].distance <= w[1].distance);
        }
    }

    #[test]
    fn leanvec_storage_searches_in_reduced_space_and_reranks() {
        let mut dataset: ContiguousDataset<f32> = ContiguousDataset::new(4);
        for i in 0..32 {
            let x = i as f32 * 0.1;
            dataset.push(&[x, 2.0 * x, -x, x * 0.5]).unwrap();
        }
        let lv = LeanVecDataset::build(&dataset, &[], 2, vamana_quant::ReductionMode::Pca).unwrap();
        let index: VamanaIndex<f32> = VamanaIndex::build_storage(
            PrimaryStorage::LeanVec(lv),
            DistanceKind::L2,
            small_params(),
            ThreadPoolHandle::sequential(),
            4,
        )
        .unwrap();
        assert!(index.uses_reranking());
        assert_eq!(index.dimensions(), 4);
        let query = vec![1.0f32, 2.0, -1.0, 0.5];
        let results = index.search(&query, 3, &never_cancel);
        assert_eq!(results.len(), 3);
    }
}
