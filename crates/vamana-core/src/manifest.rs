//! On-disk layout (§6): a directory holding a `svs_config.toml` manifest
//! plus one or more companion binary blobs, each with a fixed-size header.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

pub const MANIFEST_FILE_NAME: &str = "svs_config.toml";

const LEGACY_MAGIC: u64 = 0xf83ad4901d434f04;
const CURRENT_MAGIC: u64 = 0xcad4a6b2579980fe;
const LEGACY_HEADER_LEN: usize = 64;
const CURRENT_HEADER_LEN: usize = 1024;

/// A semantic version triple, compared component-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SchemaVersion {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::str::FromStr for SchemaVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(CoreError::other(format!("malformed version string `{s}`")));
        }
        let parse = |p: &str| {
            p.parse::<u32>()
                .map_err(|_| CoreError::other(format!("malformed version string `{s}`")))
        };
        Ok(Self::new(parse(parts[0])?, parse(parts[1])?, parse(parts[2])?))
    }
}

/// The `object` table every manifest carries: a schema tag, a version, and
/// an object-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestObject<P> {
    #[serde(rename = "__schema__")]
    pub schema: String,
    #[serde(rename = "__version__")]
    pub version: String,
    #[serde(flatten)]
    pub payload: P,
}

/// Tracks, per schema tag, the range of versions this build can load —
/// the "compatibility matrix" a rewrite should encode explicitly rather
/// than scattering `if` chains across loaders (§9).
#[derive(Debug, Default)]
pub struct CompatibilityMatrix {
    entries: Vec<(String, SchemaVersion, SchemaVersion)>,
}

impl CompatibilityMatrix {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers that `schema` is loadable for versions in
    /// `[min_version, max_version]` inclusive.
    #[must_use]
    pub fn register(
        mut self,
        schema: impl Into<String>,
        min_version: SchemaVersion,
        max_version: SchemaVersion,
    ) -> Self {
        self.entries.push((schema.into(), min_version, max_version));
        self
    }

    /// Validates a `(schema, version)` pair read from a manifest.
    ///
    /// # Errors
    /// [`CoreError::SchemaMismatch`] if the schema is unregistered or the
    /// version falls outside the registered range.
    pub fn check(&self, schema: &str, version: SchemaVersion) -> CoreResult<()> {
        for (registered_schema, min, max) in &self.entries {
            if registered_schema == schema {
                if version >= *min && version <= *max {
                    return Ok(());
                }
                return Err(CoreError::SchemaMismatch {
                    expected: format!("{registered_schema} in [{min}, {max}]"),
                    found: format!("{schema} {version}"),
                });
            }
        }
        Err(CoreError::SchemaMismatch {
            expected: "a registered schema".to_string(),
            found: schema.to_string(),
        })
    }
}

/// Writes a manifest TOML document to `dir/svs_config.toml`.
///
/// # Errors
/// [`CoreError::Io`] / [`CoreError::ManifestSerialize`] on failure.
pub fn write_manifest<P: Serialize>(dir: &Path, object: &ManifestObject<P>) -> CoreResult<()> {
    fs::create_dir_all(dir)?;
    let text = toml::to_string_pretty(object)?;
    fs::write(dir.join(MANIFEST_FILE_NAME), text)?;
    Ok(())
}

/// Reads and parses a manifest from `dir/svs_config.toml`.
///
/// # Errors
/// [`CoreError::Io`] / [`CoreError::ManifestParse`] on failure.
pub fn read_manifest<P: for<'de> Deserialize<'de>>(dir: &Path) -> CoreResult<ManifestObject<P>> {
    let text = fs::read_to_string(dir.join(MANIFEST_FILE_NAME))?;
    Ok(toml::from_str(&text)?)
}

/// Parsed, schema-agnostic binary blob header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader {
    pub uuid: Uuid,
    pub num_vectors: u64,
    pub dimensions_per_vector: u64,
    pub header_len: usize,
}

impl BlobHeader {
    #[must_use]
    pub fn new(uuid: Uuid, num_vectors: u64, dimensions_per_vector: u64) -> Self {
        Self {
            uuid,
            num_vectors,
            dimensions_per_vector,
            header_len: CURRENT_HEADER_LEN,
        }
    }

    /// Writes the header (always in the current, 1024-byte format) to `w`.
    ///
    /// # Errors
    /// [`CoreError::Io`] on write failure.
    pub fn write<W: Write>(&self, mut w: W) -> CoreResult<()> {
        let mut buf = vec![0u8; CURRENT_HEADER_LEN];
        {
            let mut cursor = &mut buf[..];
            cursor.write_u64::<LittleEndian>(CURRENT_MAGIC)?;
            cursor.write_all(self.uuid.as_bytes())?;
            cursor.write_u64::<LittleEndian>(self.num_vectors)?;
            cursor.write_u64::<LittleEndian>(self.dimensions_per_vector)?;
        }
        w.write_all(&buf)?;
        Ok(())
    }

    /// Reads a header from `r`, determining header length from the magic
    /// number and rejecting unrecognized magics.
    ///
    /// # Errors
    /// [`CoreError::MagicMismatch`] / [`CoreError::Io`] on failure.
    pub fn read<R: Read>(mut r: R) -> CoreResult<Self> {
        let magic = r.read_u64::<LittleEndian>()?;
        let header_len = match magic {
            CURRENT_MAGIC => CURRENT_HEADER_LEN,
            LEGACY_MAGIC => LEGACY_HEADER_LEN,
            other => return Err(CoreError::MagicMismatch { found: other }),
        };
        let mut uuid_bytes = [0u8; 16];
        r.read_exact(&mut uuid_bytes)?;
        let num_vectors = r.read_u64::<LittleEndian>()?;
        let dimensions_per_vector = r.read_u64::<LittleEndian>()?;
        // Consume the remaining zero-padding so the caller's reader is
        // positioned at the start of row-major vector data.
        let consumed = 8 + 16 + 8 + 8;
        let mut pad = vec![0u8; header_len - consumed];
        r.read_exact(&mut pad)?;
        Ok(Self {
            uuid: Uuid::from_bytes(uuid_bytes),
            num_vectors,
            dimensions_per_vector,
            header_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn blob_header_round_trips() {
        let uuid = Uuid::now_v7();
        let header = BlobHeader::new(uuid, 10, 128);
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len(), CURRENT_HEADER_LEN);
        let parsed = BlobHeader::read(Cursor::new(&buf)).unwrap();
        assert_eq!(parsed.uuid, uuid);
        assert_eq!(parsed.num_vectors, 10);
        assert_eq!(parsed.dimensions_per_vector, 128);
        assert_eq!(parsed.header_len, CURRENT_HEADER_LEN);
    }

    #[test]
    fn legacy_header_parses_with_short_length() {
        let mut buf = vec![0u8; LEGACY_HEADER_LEN];
        {
            let mut cursor = &mut buf[..];
            cursor.write_u64::<LittleEndian>(LEGACY_MAGIC).unwrap();
            let uuid = Uuid::nil();
            cursor.write_all(uuid.as_bytes()).unwrap();
            cursor.write_u64::<LittleEndian>(5).unwrap();
            cursor.write_u64::<LittleEndian>(16).unwrap();
        }
        let parsed = BlobHeader::read(Cursor::new(&buf)).unwrap();
        assert_eq!(parsed.header_len, LEGACY_HEADER_LEN);
        assert_eq!(parsed.num_vectors, 5);
    }

    #[test]
    fn unrecognized_magic_is_hard_error() {
        let mut buf = vec![0u8; 64];
        (&mut buf[..]).write_u64::<LittleEndian>(0xdead_beef).unwrap();
        let err = BlobHeader::read(Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, CoreError::MagicMismatch { .. }));
    }

    #[test]
    fn compatibility_matrix_rejects_unknown_schema() {
        let matrix = CompatibilityMatrix::new().register(
            "vamana_index_parameters",
            SchemaVersion::new(1, 0, 0),
            SchemaVersion::new(1, 2, 0),
        );
        assert!(matrix
            .check("vamana_index_parameters", SchemaVersion::new(1, 1, 0))
            .is_ok());
        assert!(matrix
            .check("vamana_index_parameters", SchemaVersion::new(2, 0, 0))
            .is_err());
        assert!(matrix.check("lvq_dataset", SchemaVersion::new(1, 0, 0)).is_err());
    }

    #[test]
    fn manifest_round_trips_through_toml() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Payload {
            dimension: usize,
        }
        let dir = tempfile::tempdir().unwrap();
        let object = ManifestObject {
            schema: "vamana_index_parameters".to_string(),
            version: "1.0.0".to_string(),
            payload: Payload { dimension: 128 },
        };
        write_manifest(dir.path(), &object).unwrap();
        let loaded: ManifestObject<Payload> = read_manifest(dir.path()).unwrap();
        assert_eq!(loaded.schema, object.schema);
        assert_eq!(loaded.payload, object.payload);
    }
}
