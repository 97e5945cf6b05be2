//! Dataset abstraction (§3): an ordered, fixed-dimension, fixed-element-type
//! collection of vectors with O(1) random access. Two storage layouts are
//! provided: [`ContiguousDataset`] (one flat buffer) and [`BlockedDataset`]
//! (fixed-size blocks supporting in-place growth).

use crate::element::Element;
use crate::error::{CoreError, CoreResult};

/// Read-only random access to a collection of same-dimension vectors.
pub trait Dataset<T: Element>: Send + Sync {
    fn size(&self) -> usize;
    fn dimensions(&self) -> usize;

    /// Returns an immutable view of vector `i`.
    ///
    /// # Panics
    /// Panics if `i >= self.size()`, matching the teacher's accessor
    /// contract of O(1) unchecked access on the hot path; callers on a
    /// public boundary should check `i < size()` first.
    fn get_datum(&self, i: usize) -> &[T];
}

/// Mutable extension of [`Dataset`]: in-place replacement of one vector.
pub trait MutableDataset<T: Element>: Dataset<T> {
    /// Replaces vector `i` with `v`.
    ///
    /// # Errors
    /// [`CoreError::DimensionMismatch`] if `v.len() != self.dimensions()`.
    fn set_datum(&mut self, i: usize, v: &[T]) -> CoreResult<()>;
}

/// One flat buffer, row-major. The simplest and fastest layout; used for
/// static indexes where the size is known up front.
#[derive(Debug, Clone)]
pub struct ContiguousDataset<T: Element> {
    data: Vec<T>,
    dimensions: usize,
    size: usize,
}

impl<T: Element> ContiguousDataset<T> {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            data: Vec::new(),
            dimensions,
            size: 0,
        }
    }

    /// Builds a dataset from row-major data, validating that `data.len()`
    /// is a multiple of `dimensions`.
    ///
    /// # Errors
    /// [`CoreError::Other`] if `data.len()` is not a multiple of `dimensions`.
    pub fn from_rows(data: Vec<T>, dimensions: usize) -> CoreResult<Self> {
        if dimensions == 0 || data.len() % dimensions != 0 {
            return Err(CoreError::other(format!(
                "data length {} is not a multiple of dimensions {}",
                data.len(),
                dimensions
            )));
        }
        let size = data.len() / dimensions;
        Ok(Self {
            data,
            dimensions,
            size,
        })
    }

    /// Appends a vector, growing the dataset by one. Used by builders and
    /// dynamic `add_points` before a slot-stable blocked layout takes over.
    ///
    /// # Errors
    /// [`CoreError::DimensionMismatch`] if `v.len() != self.dimensions`.
    pub fn push(&mut self, v: &[T]) -> CoreResult<()> {
        if v.len() != self.dimensions {
            return Err(CoreError::DimensionMismatch {
                expected: self.dimensions,
                found: v.len(),
            });
        }
        self.data.extend_from_slice(v);
        self.size += 1;
        Ok(())
    }

    #[must_use]
    pub fn as_flat_slice(&self) -> &[T] {
        &self.data
    }
}

impl<T: Element> Dataset<T> for ContiguousDataset<T> {
    fn size(&self) -> usize {
        self.size
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn get_datum(&self, i: usize) -> &[T] {
        let start = i * self.dimensions;
        &self.data[start..start + self.dimensions]
    }
}

impl<T: Element> MutableDataset<T> for ContiguousDataset<T> {
    fn set_datum(&mut self, i: usize, v: &[T]) -> CoreResult<()> {
        if v.len() != self.dimensions {
            return Err(CoreError::DimensionMismatch {
                expected: self.dimensions,
                found: v.len(),
            });
        }
        let start = i * self.dimensions;
        self.data[start..start + self.dimensions].copy_from_slice(v);
        Ok(())
    }
}

/// Default block size (~1 MiB), a power of two, as required by §3.
pub const DEFAULT_BLOCK_BYTES: usize = 1 << 20;

/// A sequence of fixed-size blocks. Growth appends a new block without
/// invalidating indices that fall in earlier blocks, which is what lets a
/// dynamic index's concurrent readers keep operating on existing slots
/// while a writer extends storage for newly inserted ones.
#[derive(Debug, Clone)]
pub struct BlockedDataset<T: Element> {
    blocks: Vec<Vec<T>>,
    rows_per_block: usize,
    dimensions: usize,
    size: usize,
}

impl<T: Element> BlockedDataset<T> {
    /// Creates an empty blocked dataset with a block size derived from
    /// `block_bytes` (rounded down to a whole number of rows, minimum 1).
    #[must_use]
    pub fn new(dimensions: usize, block_bytes: usize) -> Self {
        let row_bytes = dimensions * T::SIZE;
        let rows_per_block = (block_bytes / row_bytes.max(1)).max(1);
        Self {
            blocks: Vec::new(),
            rows_per_block,
            dimensions,
            size: 0,
        }
    }

    #[must_use]
    pub fn with_default_block_size(dimensions: usize) -> Self {
        Self::new(dimensions, DEFAULT_BLOCK_BYTES)
    }

    fn locate(&self, i: usize) -> (usize, usize) {
        (i / self.rows_per_block, i % self.rows_per_block)
    }

    /// Grows storage, if needed, so that slot `i` is addressable, then
    /// writes `v` into it. Existing slots in earlier blocks are untouched.
    ///
    /// # Errors
    /// [`CoreError::DimensionMismatch`] if `v.len() != self.dimensions`.
    pub fn ensure_and_set(&mut self, i: usize, v: &[T]) -> CoreResult<()> {
        if v.len() != self.dimensions {
            return Err(CoreError::DimensionMismatch {
                expected: self.dimensions,
                found: v.len(),
            });
        }
        let (block_idx, row_in_block) = self.locate(i);
        while self.blocks.len() <= block_idx {
            self.blocks
                .push(vec![T::from_f32(0.0); self.rows_per_block * self.dimensions]);
        }
        let block = &mut self.blocks[block_idx];
        let start = row_in_block * self.dimensions;
        block[start..start + self.dimensions].copy_from_slice(v);
        self.size = self.size.max(i + 1);
        Ok(())
    }
}

impl<T: Element> Dataset<T> for BlockedDataset<T> {
    fn size(&self) -> usize {
        self.size
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn get_datum(&self, i: usize) -> &[T] {
        let (block_idx, row_in_block) = self.locate(i);
        let start = row_in_block * self.dimensions;
        &self.blocks[block_idx][start..start + self.dimensions]
    }
}

impl<T: Element> MutableDataset<T> for BlockedDataset<T> {
    fn set_datum(&mut self, i: usize, v: &[T]) -> CoreResult<()> {
        self.ensure_and_set(i, v)
    }
}

/// A stateless functor returning an `f32` view of a dataset vector,
/// decoding as needed. The uncompressed accessor is the identity; LVQ and
/// LeanVec provide their own in their respective crates.
pub trait Accessor<T: Element, D: Dataset<T>> {
    fn access<'a>(&self, dataset: &'a D, i: usize) -> std::borrow::Cow<'a, [f32]>;
}

/// The trivial accessor for uncompressed datasets whose element type is
/// already `f32`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityAccessor;

impl<D: Dataset<f32>> Accessor<f32, D> for IdentityAccessor {
    fn access<'a>(&self, dataset: &'a D, i: usize) -> std::borrow::Cow<'a, [f32]> {
        std::borrow::Cow::Borrowed(dataset.get_datum(i))
    }
}
