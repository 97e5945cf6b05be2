//! Legacy external formats accepted at load but never written by this
//! library (§6): `fvecs`/`ivecs`/`bvecs`. Each vector is prefixed by a
//! 4-byte little-endian dimension followed by its raw elements.

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::CoreResult;

/// Reads a `.fvecs`-formatted byte stream into row-major `f32` data.
///
/// # Errors
/// [`crate::error::CoreError::Io`] on a truncated/malformed stream, or
/// [`crate::error::CoreError::Other`] if vectors disagree on dimension.
pub fn read_fvecs<R: Read>(mut r: R) -> CoreResult<(Vec<f32>, usize)> {
    read_vecs(&mut r, |r| r.read_f32::<LittleEndian>().map_err(Into::into))
}

/// Reads a `.ivecs`-formatted byte stream (32-bit signed integers, widened
/// to `f32` for use as generic element data).
///
/// # Errors
/// See [`read_fvecs`].
pub fn read_ivecs<R: Read>(mut r: R) -> CoreResult<(Vec<f32>, usize)> {
    read_vecs(&mut r, |r| {
        Ok(r.read_i32::<LittleEndian>()? as f32)
    })
}

/// Reads a `.bvecs`-formatted byte stream (unsigned byte elements).
///
/// # Errors
/// See [`read_fvecs`].
pub fn read_bvecs<R: Read>(mut r: R) -> CoreResult<(Vec<f32>, usize)> {
    let mut dimensions = None;
    let mut flat = Vec::new();
    loop {
        let dim = match r.read_i32::<LittleEndian>() {
            Ok(d) => d as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        if let Some(expected) = dimensions {
            if expected != dim {
                return Err(crate::error::CoreError::other(
                    "bvecs file contains vectors of differing dimension",
                ));
            }
        } else {
            dimensions = Some(dim);
        }
        let mut row = vec![0u8; dim];
        r.read_exact(&mut row)?;
        flat.extend(row.into_iter().map(f32::from));
    }
    Ok((flat, dimensions.unwrap_or(0)))
}

fn read_vecs<R: Read>(
    r: &mut R,
    mut read_elem: impl FnMut(&mut R) -> CoreResult<f32>,
) -> CoreResult<(Vec<f32>, usize)> {
    let mut dimensions = None;
    let mut flat = Vec::new();
    loop {
        let dim = match r.read_i32::<LittleEndian>() {
            Ok(d) => d as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        if let Some(expected) = dimensions {
            if expected != dim {
                return Err(crate::error::CoreError::other(
                    "vecs file contains vectors of differing dimension",
                ));
            }
        } else {
            dimensions = Some(dim);
        }
        for _ in 0..dim {
            flat.push(read_elem(r)?);
        }
    }
    Ok((flat, dimensions.unwrap_or(0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Cursor;

    fn encode_fvecs(rows: &[Vec<f32>]) -> Vec<u8> {
        let mut buf = Vec::new();
        for row in rows {
            buf.write_i32::<LittleEndian>(row.len() as i32).unwrap();
            for v in row {
                buf.write_f32::<LittleEndian>(*v).unwrap();
            }
        }
        buf
    }

    #[test]
    fn fvecs_round_trips() {
        let rows = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        let bytes = encode_fvecs(&rows);
        let (flat, dim) = read_fvecs(Cursor::new(bytes)).unwrap();
        assert_eq!(dim, 3);
        assert_eq!(flat, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn bvecs_widens_bytes_to_f32() {
        let mut buf = Vec::new();
        buf.write_i32::<LittleEndian>(2).unwrap();
        buf.push(10);
        buf.push(200);
        let (flat, dim) = read_bvecs(Cursor::new(buf)).unwrap();
        assert_eq!(dim, 2);
        assert_eq!(flat, vec![10.0, 200.0]);
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let mut buf = Vec::new();
        buf.write_i32::<LittleEndian>(2).unwrap();
        buf.write_f32::<LittleEndian>(1.0).unwrap();
        buf.write_f32::<LittleEndian>(2.0).unwrap();
        buf.write_i32::<LittleEndian>(3).unwrap();
        buf.write_f32::<LittleEndian>(1.0).unwrap();
        buf.write_f32::<LittleEndian>(2.0).unwrap();
        buf.write_f32::<LittleEndian>(3.0).unwrap();
        assert!(read_fvecs(Cursor::new(buf)).is_err());
    }
}
