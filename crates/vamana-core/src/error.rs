use thiserror::Error;

/// Canonical error type shared by every crate in the workspace.
///
/// The tag set matches the "Error surface" pinned in the on-disk format
/// specification: `SchemaMismatch`, `MagicMismatch`, `DimensionMismatch`,
/// `UuidNotFound`, `OutOfRangeId`, `Unconvergent`, plus a catch-all `Other`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Manifest `__schema__`/`__version__` tag is unknown or unsupported.
    #[error("schema mismatch: expected `{expected}`, found `{found}`")]
    SchemaMismatch {
        expected: String,
        found: String,
    },

    /// Blob header magic number did not match either supported constant.
    #[error("magic mismatch: unrecognized blob header magic 0x{found:016x}")]
    MagicMismatch { found: u64 },

    /// In-memory expected dimension disagrees with the on-disk dimension.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// A blob referenced by UUID was not locatable in the expected directory.
    #[error("uuid `{0}` not found in directory")]
    UuidNotFound(uuid::Uuid),

    /// Caller supplied an external or internal ID outside the valid range.
    #[error("id {id} out of range (valid range is [0, {size}))")]
    OutOfRangeId { id: u64, size: usize },

    /// Calibration could not meet the requested recall target.
    #[error("calibration did not converge to target recall {target}; best achieved {achieved}")]
    Unconvergent { target: f64, achieved: f64 },

    /// Entity was not found (used by ID translators and clustering lookups).
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },

    /// Operation violates a documented invariant or state-machine rule.
    #[error("invalid state: {message}")]
    InvalidState { message: String },

    /// I/O error occurred while reading or writing a persisted artifact.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML manifest failed to parse.
    #[error("manifest parse error: {0}")]
    ManifestParse(#[from] toml::de::Error),

    /// TOML manifest failed to serialize.
    #[error("manifest serialize error: {0}")]
    ManifestSerialize(#[from] toml::ser::Error),

    /// Catch-all for well-formed but semantically rejected inputs.
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    #[must_use]
    pub fn out_of_range(id: u64, size: usize) -> Self {
        Self::OutOfRangeId { id, size }
    }
}

/// Convenient result alias used throughout the workspace.
pub type CoreResult<T> = Result<T, CoreError>;
