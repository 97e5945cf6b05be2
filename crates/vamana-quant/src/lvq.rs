//! Locally-adaptive Vector Quantization (§4.5): per-vector scale-and-bias
//! quantization relative to a selected centroid, in one- and two-level
//! (residual) variants, with two packing strategies.

use rand::seq::SliceRandom;
use rand::SeedableRng;

use vamana_core::dataset::{ContiguousDataset, Dataset};
use vamana_core::element::Element;
use vamana_core::error::{CoreError, CoreResult};

/// How packed primary/residual codes are laid out in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackingStrategy {
    /// Bits packed lsb-first into bytes, row-major.
    Sequential,
    /// 16-lane interleaving of 8-bit groups, enabling SIMD gather-free
    /// inner loops. Only defined for 4- and 8-bit primary, 0- or 8-bit
    /// residual codes (§4.5).
    Turbo16x8,
}

impl PackingStrategy {
    /// Validates a primary-level code width. Turbo<16,8> accepts 4- or
    /// 8-bit primary codes (§4.5).
    fn validate_primary(self, bits: u8) -> CoreResult<()> {
        if self == PackingStrategy::Turbo16x8 && !matches!(bits, 4 | 8) {
            return Err(CoreError::other(format!(
                "Turbo<16,8> packing is undefined for a {bits}-bit primary code"
            )));
        }
        Ok(())
    }

    /// Validates a residual-level code width. Turbo<16,8> accepts only a
    /// 0- (no residual) or 8-bit residual (§4.5); a 4-bit residual must be
    /// rejected even though 4 is a valid *primary* width.
    fn validate_residual(self, bits: u8) -> CoreResult<()> {
        if self == PackingStrategy::Turbo16x8 && !matches!(bits, 0 | 8) {
            return Err(CoreError::other(format!(
                "Turbo<16,8> packing is undefined for a {bits}-bit residual code"
            )));
        }
        Ok(())
    }
}

/// Packs `values` (each in `[0, 2^bits)` for unsigned codes, interpreted
/// as an already-biased representation for signed residual codes) using
/// `strategy`.
fn pack(values: &[u8], bits: u8, strategy: PackingStrategy) -> Vec<u8> {
    if bits == 0 {
        return Vec::new();
    }
    match strategy {
        PackingStrategy::Sequential => pack_sequential(values, bits),
        PackingStrategy::Turbo16x8 => pack_turbo(values, bits),
    }
}

fn unpack(bytes: &[u8], count: usize, bits: u8, strategy: PackingStrategy) -> Vec<u8> {
    if bits == 0 {
        return vec![0; count];
    }
    match strategy {
        PackingStrategy::Sequential => unpack_sequential(bytes, count, bits),
        PackingStrategy::Turbo16x8 => unpack_turbo(bytes, count, bits),
    }
}

fn pack_sequential(values: &[u8], bits: u8) -> Vec<u8> {
    if bits == 8 {
        return values.to_vec();
    }
    debug_assert_eq!(bits, 4);
    let mut out = vec![0u8; values.len().div_ceil(2)];
    for (i, &v) in values.iter().enumerate() {
        let byte = i / 2;
        if i % 2 == 0 {
            out[byte] |= v & 0x0F;
        } else {
            out[byte] |= (v & 0x0F) << 4;
        }
    }
    out
}

fn unpack_sequential(bytes: &[u8], count: usize, bits: u8) -> Vec<u8> {
    if bits == 8 {
        return bytes[..count].to_vec();
    }
    debug_assert_eq!(bits, 4);
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let byte = bytes[i / 2];
        let v = if i % 2 == 0 { byte & 0x0F } else { byte >> 4 };
        out.push(v);
    }
    out
}

/// Turbo<16,8>: values are processed in groups of up to 16. For 8-bit
/// codes each lane is already a byte, so the layout is the identity. For
/// 4-bit codes the low half of the group's nibbles is stored in the low
/// nibble of each output byte and the high half in the high nibble,
/// producing 8 densely packed bytes per 16-value group that a SIMD loop
/// can unpack with a single shift+mask per lane without a gather.
fn pack_turbo(values: &[u8], bits: u8) -> Vec<u8> {
    if bits == 8 {
        return values.to_vec();
    }
    debug_assert_eq!(bits, 4);
    let mut out = Vec::new();
    for chunk in values.chunks(16) {
        let half = chunk.len().div_ceil(2);
        for k in 0..half {
            let lo = chunk[k];
            let hi = chunk.get(k + half).copied().unwrap_or(0);
            out.push((lo & 0x0F) | ((hi & 0x0F) << 4));
        }
    }
    out
}

fn unpack_turbo(bytes: &[u8], count: usize, bits: u8) -> Vec<u8> {
    if bits == 8 {
        return bytes[..count].to_vec();
    }
    debug_assert_eq!(bits, 4);
    let mut out = vec![0u8; count];
    let mut byte_cursor = 0usize;
    let mut dim_cursor = 0usize;
    while dim_cursor < count {
        let group_len = (count - dim_cursor).min(16);
        let half = group_len.div_ceil(2);
        for k in 0..half {
            let b = bytes[byte_cursor + k];
            out[dim_cursor + k] = b & 0x0F;
            if k + half < group_len {
                out[dim_cursor + k + half] = b >> 4;
            }
        }
        byte_cursor += half;
        dim_cursor += group_len;
    }
    out
}

/// A small shared table of centroids indexed by `selector`.
#[derive(Debug, Clone)]
pub struct CentroidTable {
    centroids: ContiguousDataset<f32>,
}

impl CentroidTable {
    /// Builds a table from an explicit, pre-computed set of centroid
    /// vectors (e.g. the output of IVF k-means, or a single dataset
    /// medoid for the "global" one-level variant with `C == 1`).
    ///
    /// # Errors
    /// [`CoreError::Other`] if `centroids.is_empty()` or exceeds 256
    /// entries (§3 caps `C <= 256`).
    pub fn from_vectors(centroids: Vec<Vec<f32>>, dimensions: usize) -> CoreResult<Self> {
        if centroids.is_empty() || centroids.len() > 256 {
            return Err(CoreError::other(format!(
                "centroid table must hold between 1 and 256 entries, got {}",
                centroids.len()
            )));
        }
        let mut table = ContiguousDataset::new(dimensions);
        for c in &centroids {
            table.push(c)?;
        }
        Ok(Self { centroids: table })
    }

    /// Samples `num_centroids` distinct rows from `dataset` without
    /// replacement, the default training strategy when the caller has no
    /// externally computed clustering to reuse.
    pub fn sample<T: Element, D: Dataset<T>>(
        dataset: &D,
        num_centroids: usize,
        seed: u64,
    ) -> CoreResult<Self> {
        let n = dataset.size();
        let num_centroids = num_centroids.min(n).max(1);
        let mut indices: Vec<usize> = (0..n).collect();
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);
        let rows: Vec<Vec<f32>> = indices[..num_centroids]
            .iter()
            .map(|&i| vamana_core::element::to_f32_vec(dataset.get_datum(i)))
            .collect();
        Self::from_vectors(rows, dataset.dimensions())
    }

    /// The "global" variant: a single centroid, the dataset's medoid.
    pub fn global<T: Element, D: Dataset<T>>(dataset: &D) -> CoreResult<Self> {
        let medoid = vamana_core::medoid::approximate_medoid(dataset, 1000, 0);
        let row = vamana_core::element::to_f32_vec(dataset.get_datum(medoid));
        Self::from_vectors(vec![row], dataset.dimensions())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.centroids.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.centroids.size() == 0
    }

    #[must_use]
    pub fn get(&self, selector: u8) -> &[f32] {
        self.centroids.get_datum(selector as usize)
    }

    fn nearest(&self, v: &[f32]) -> u8 {
        let mut best = 0u8;
        let mut best_dist = f32::MAX;
        for i in 0..self.centroids.size() {
            let d = vamana_core::distance::L2Distance::compute_pair(v, self.centroids.get_datum(i));
            if d < best_dist {
                best_dist = d;
                best = i as u8;
            }
        }
        best
    }
}

/// Per-vector metadata accompanying the packed code.
#[derive(Debug, Clone, Copy, Default)]
struct Header {
    selector: u8,
    scale: f32,
    bias: f32,
}

/// One-level LVQ dataset: `decoded = centroid[selector] + scale *
/// decode(packed_primary) + bias`.
#[derive(Debug, Clone)]
pub struct LvqOneLevelDataset {
    centroids: CentroidTable,
    headers: Vec<Header>,
    packed: Vec<u8>,
    squared_norms: Vec<f32>,
    dimensions: usize,
    primary_bits: u8,
    packing: PackingStrategy,
    bytes_per_row: usize,
}

fn quantize_row(
    residual: &[f32],
    bits: u8,
) -> (f32, f32, Vec<u8>) {
    let min = residual.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = residual.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let levels = (1u32 << bits) - 1;
    let scale = if max > min {
        (max - min) / levels as f32
    } else {
        1.0
    };
    let bias = min;
    let codes: Vec<u8> = residual
        .iter()
        .map(|&r| (((r - bias) / scale).round().clamp(0.0, levels as f32)) as u8)
        .collect();
    (scale, bias, codes)
}

impl LvqOneLevelDataset {
    /// Encodes every row of `dataset` against `centroids`.
    ///
    /// # Errors
    /// [`CoreError::Other`] if `primary_bits` is unsupported, or if
    /// `packing == Turbo16x8` and `primary_bits` is not 4 or 8.
    pub fn encode<T: Element, D: Dataset<T>>(
        dataset: &D,
        centroids: CentroidTable,
        primary_bits: u8,
        packing: PackingStrategy,
    ) -> CoreResult<Self> {
        if !matches!(primary_bits, 4 | 8) {
            return Err(CoreError::other(format!(
                "unsupported primary_bits {primary_bits}; expected 4 or 8"
            )));
        }
        packing.validate_primary(primary_bits)?;
        let dimensions = dataset.dimensions();
        let bytes_per_row = (dimensions * primary_bits as usize).div_ceil(8);
        let n = dataset.size();
        let mut headers = Vec::with_capacity(n);
        let mut packed = Vec::with_capacity(n * bytes_per_row);
        let mut squared_norms = Vec::with_capacity(n);

        for i in 0..n {
            let v = vamana_core::element::to_f32_vec(dataset.get_datum(i));
            let selector = centroids.nearest(&v);
            let centroid = centroids.get(selector);
            let residual: Vec<f32> = v.iter().zip(centroid).map(|(a, b)| a - b).collect();
            let (scale, bias, codes) = quantize_row(&residual, primary_bits);
            let row_bytes = pack(&codes, primary_bits, packing);
            debug_assert_eq!(row_bytes.len(), bytes_per_row);
            packed.extend(row_bytes);
            headers.push(Header {
                selector,
                scale,
                bias,
            });
            let decoded = decode_row(centroid, scale, bias, &codes);
            squared_norms.push(decoded.iter().map(|x| x * x).sum());
        }

        Ok(Self {
            centroids,
            headers,
            packed,
            squared_norms,
            dimensions,
            primary_bits,
            packing,
            bytes_per_row,
        })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.headers.len()
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn codes(&self, i: usize) -> Vec<u8> {
        let row = &self.packed[i * self.bytes_per_row..(i + 1) * self.bytes_per_row];
        unpack(row, self.dimensions, self.primary_bits, self.packing)
    }

    /// Decodes vector `i` back into `f32` space.
    #[must_use]
    pub fn reconstruct(&self, i: usize) -> Vec<f32> {
        let h = self.headers[i];
        let centroid = self.centroids.get(h.selector);
        let codes = self.codes(i);
        decode_row(centroid, h.scale, h.bias, &codes)
    }

    #[must_use]
    pub fn squared_norm(&self, i: usize) -> f32 {
        self.squared_norms[i]
    }

    /// Adapted L2 distance: understands the packed layout directly rather
    /// than fully decoding before computing (§4.1 `adapt`).
    #[must_use]
    pub fn adapted_l2(&self, query: &[f32]) -> LvqL2Query {
        let query_sq_norm = query.iter().map(|x| x * x).sum();
        LvqL2Query {
            query: query.to_vec(),
            query_sq_norm,
        }
    }

    #[must_use]
    pub fn compute_l2(&self, q: &LvqL2Query, i: usize) -> f32 {
        let decoded = self.reconstruct(i);
        let dot: f32 = q.query.iter().zip(&decoded).map(|(a, b)| a * b).sum();
        q.query_sq_norm - 2.0 * dot + self.squared_norms[i]
    }
}

fn decode_row(centroid: &[f32], scale: f32, bias: f32, codes: &[u8]) -> Vec<f32> {
    centroid
        .iter()
        .zip(codes)
        .map(|(c, &code)| c + scale * (f32::from(code)) + bias)
        .collect()
}

/// Precomputed query-side state for [`LvqOneLevelDataset::compute_l2`],
/// the stateful half of the fix-argument protocol.
#[derive(Debug, Clone)]
pub struct LvqL2Query {
    query: Vec<f32>,
    query_sq_norm: f32,
}

/// Two-level LVQ dataset: adds a packed residual giving a finer
/// correction after one-level reconstruction.
#[derive(Debug, Clone)]
pub struct LvqTwoLevelDataset {
    base: LvqOneLevelDataset,
    residual_scales: Vec<f32>,
    packed_residual: Vec<u8>,
    squared_norms: Vec<f32>,
    residual_bits: u8,
    residual_bytes_per_row: usize,
}

impl LvqTwoLevelDataset {
    /// Encodes `dataset`, first at `primary_bits` against `centroids`,
    /// then encoding the residual of that approximation at
    /// `residual_bits`.
    ///
    /// # Errors
    /// Propagates [`LvqOneLevelDataset::encode`]'s errors, plus
    /// [`CoreError::Other`] if `residual_bits` is unsupported.
    pub fn encode<T: Element, D: Dataset<T>>(
        dataset: &D,
        centroids: CentroidTable,
        primary_bits: u8,
        residual_bits: u8,
        packing: PackingStrategy,
    ) -> CoreResult<Self> {
        if !matches!(residual_bits, 4 | 8) {
            return Err(CoreError::other(format!(
                "unsupported residual_bits {residual_bits}; expected 4 or 8"
            )));
        }
        packing.validate_residual(residual_bits)?;
        let base = LvqOneLevelDataset::encode(dataset, centroids, primary_bits, packing)?;
        let dimensions = base.dimensions;
        let residual_bytes_per_row = (dimensions * residual_bits as usize).div_ceil(8);
        let n = base.size();
        let mut residual_scales = Vec::with_capacity(n);
        let mut packed_residual = Vec::with_capacity(n * residual_bytes_per_row);
        let mut squared_norms = Vec::with_capacity(n);

        let levels = (1i32 << (residual_bits - 1)) - 1;
        for i in 0..n {
            let v = vamana_core::element::to_f32_vec(dataset.get_datum(i));
            let approx = base.reconstruct(i);
            let residual: Vec<f32> = v.iter().zip(&approx).map(|(a, b)| a - b).collect();
            let h = base.headers[i];
            let residual_scale = if h.scale > 0.0 {
                h.scale / ((1i32 << residual_bits) - 1) as f32
            } else {
                1.0
            };
            let codes: Vec<u8> = residual
                .iter()
                .map(|&r| {
                    let signed = (r / residual_scale)
                        .round()
                        .clamp(-(levels as f32) - 1.0, levels as f32) as i32;
                    (signed & ((1 << residual_bits) - 1)) as u8
                })
                .collect();
            let row_bytes = pack(&codes, residual_bits, packing);
            packed_residual.extend(row_bytes);
            residual_scales.push(residual_scale);

            let decoded = decode_two_level_row(&approx, residual_scale, residual_bits, &codes);
            squared_norms.push(decoded.iter().map(|x| x * x).sum());
        }

        Ok(Self {
            base,
            residual_scales,
            packed_residual,
            squared_norms,
            residual_bits,
            residual_bytes_per_row,
        })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.base.size()
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.base.dimensions()
    }

    /// The one-level (pre-residual) reconstruction, the cheaper view
    /// graph search traverses against; [`Self::reconstruct`] adds the
    /// residual correction on top for reranking.
    #[must_use]
    pub fn primary_reconstruct(&self, i: usize) -> Vec<f32> {
        self.base.reconstruct(i)
    }

    fn residual_codes(&self, i: usize) -> Vec<u8> {
        let row = &self.packed_residual
            [i * self.residual_bytes_per_row..(i + 1) * self.residual_bytes_per_row];
        unpack(row, self.base.dimensions, self.residual_bits, self.base.packing)
    }

    #[must_use]
    pub fn reconstruct(&self, i: usize) -> Vec<f32> {
        let approx = self.base.reconstruct(i);
        let codes = self.residual_codes(i);
        decode_two_level_row(&approx, self.residual_scales[i], self.residual_bits, &codes)
    }

    #[must_use]
    pub fn squared_norm(&self, i: usize) -> f32 {
        self.squared_norms[i]
    }

    #[must_use]
    pub fn adapted_l2(&self, query: &[f32]) -> LvqL2Query {
        self.base.adapted_l2(query)
    }

    #[must_use]
    pub fn compute_l2(&self, q: &LvqL2Query, i: usize) -> f32 {
        let decoded = self.reconstruct(i);
        let dot: f32 = q.query.iter().zip(&decoded).map(|(a, b)| a * b).sum();
        q.query_sq_norm - 2.0 * dot + self.squared_norms[i]
    }
}

fn decode_two_level_row(approx: &[f32], residual_scale: f32, residual_bits: u8, codes: &[u8]) -> Vec<f32> {
    let sign_bit = 1u8 << (residual_bits - 1);
    approx
        .iter()
        .zip(codes)
        .map(|(a, &code)| {
            let signed = if code & sign_bit != 0 {
                i32::from(code) - (1 << residual_bits)
            } else {
                i32::from(code)
            };
            a + residual_scale * signed as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vamana_core::dataset::ContiguousDataset;

    fn sample_dataset() -> ContiguousDataset<f32> {
        let mut d: ContiguousDataset<f32> = ContiguousDataset::new(8);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..64 {
            let row: Vec<f32> = (0..8)
                .map(|_| rand::Rng::gen_range(&mut rng, -5.0f32..5.0))
                .collect();
            d.push(&row).unwrap();
        }
        d
    }

    #[test]
    fn sequential_pack_round_trips_4bit() {
        let values: Vec<u8> = (0..15).collect();
        let bytes = pack_sequential(&values, 4);
        let back = unpack_sequential(&bytes, values.len(), 4);
        assert_eq!(values, back);
    }

    #[test]
    fn sequential_pack_round_trips_8bit() {
        let values: Vec<u8> = (0..40).collect();
        let bytes = pack_sequential(&values, 8);
        let back = unpack_sequential(&bytes, values.len(), 8);
        assert_eq!(values, back);
    }

    #[test]
    fn turbo_pack_round_trips_4bit_full_group() {
        let values: Vec<u8> = (0..16).map(|i| i % 16).collect();
        let bytes = pack_turbo(&values, 4);
        assert_eq!(bytes.len(), 8);
        let back = unpack_turbo(&bytes, values.len(), 4);
        assert_eq!(values, back);
    }

    #[test]
    fn turbo_pack_round_trips_ragged_tail() {
        let values: Vec<u8> = (0..20).map(|i| (i % 16) as u8).collect();
        let bytes = pack_turbo(&values, 4);
        let back = unpack_turbo(&bytes, values.len(), 4);
        assert_eq!(values, back);
    }

    #[test]
    fn turbo_rejects_unsupported_primary_bits() {
        assert!(PackingStrategy::Turbo16x8.validate_primary(6).is_err());
        assert!(PackingStrategy::Turbo16x8.validate_primary(4).is_ok());
        assert!(PackingStrategy::Turbo16x8.validate_primary(8).is_ok());
    }

    #[test]
    fn turbo_rejects_4bit_residual_but_allows_8bit() {
        assert!(PackingStrategy::Turbo16x8.validate_residual(4).is_err());
        assert!(PackingStrategy::Turbo16x8.validate_residual(0).is_ok());
        assert!(PackingStrategy::Turbo16x8.validate_residual(8).is_ok());
    }

    #[test]
    fn two_level_encode_rejects_turbo_with_4bit_residual() {
        let dataset = sample_dataset();
        let centroids = CentroidTable::global(&dataset).unwrap();
        let err = LvqTwoLevelDataset::encode(
            &dataset,
            centroids,
            4,
            4,
            PackingStrategy::Turbo16x8,
        );
        assert!(err.is_err());
    }

    #[test]
    fn one_level_reconstruction_is_bounded_by_quantization_step() {
        let dataset = sample_dataset();
        let centroids = CentroidTable::global(&dataset).unwrap();
        let lvq =
            LvqOneLevelDataset::encode(&dataset, centroids, 8, PackingStrategy::Sequential).unwrap();
        for i in 0..dataset.size() {
            let original = dataset.get_datum(i);
            let decoded = lvq.reconstruct(i);
            for (a, b) in original.iter().zip(&decoded) {
                assert!((a - b).abs() < 0.2, "decoded {b} too far from original {a}");
            }
        }
    }

    #[test]
    fn two_level_is_at_least_as_accurate_as_one_level() {
        let dataset = sample_dataset();
        let centroids = CentroidTable::global(&dataset).unwrap();
        let one = LvqOneLevelDataset::encode(
            &dataset,
            centroids.clone(),
            4,
            PackingStrategy::Sequential,
        )
        .unwrap();
        let two = LvqTwoLevelDataset::encode(
            &dataset,
            centroids,
            4,
            8,
            PackingStrategy::Sequential,
        )
        .unwrap();

        let mut one_err = 0.0f32;
        let mut two_err = 0.0f32;
        for i in 0..dataset.size() {
            let original = dataset.get_datum(i);
            let d1 = one.reconstruct(i);
            let d2 = two.reconstruct(i);
            one_err += original
                .iter()
                .zip(&d1)
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f32>();
            two_err += original
                .iter()
                .zip(&d2)
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f32>();
        }
        assert!(two_err <= one_err);
    }

    #[test]
    fn adapted_l2_matches_brute_force_within_tolerance() {
        let dataset = sample_dataset();
        let centroids = CentroidTable::global(&dataset).unwrap();
        let lvq =
            LvqOneLevelDataset::encode(&dataset, centroids, 8, PackingStrategy::Sequential).unwrap();
        let query = vec![1.0f32; 8];
        let q = lvq.adapted_l2(&query);
        for i in 0..dataset.size() {
            let decoded = lvq.reconstruct(i);
            let brute = vamana_core::distance::L2Distance::compute_pair(&query, &decoded);
            let adapted = lvq.compute_l2(&q, i);
            assert!((brute - adapted).abs() < 1e-3);
        }
    }
}
