//! Binary depth artifact (`depth_data_<ts>.bin`).
//!
//! Layout: magic `DWD1`, `u32` rows, `u32` cols, then `rows * cols` little-endian `f32`.

use anyhow::{anyhow, Result};

use super::{DisparityField, MAX_FIELD_DIM};

const DEPTH_MAGIC: &[u8; 4] = b"DWD1";

pub fn encode_depth_data(field: &DisparityField) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + field.len() * 4);
    out.extend_from_slice(DEPTH_MAGIC);
    out.extend_from_slice(&(field.rows() as u32).to_le_bytes());
    out.extend_from_slice(&(field.cols() as u32).to_le_bytes());
    for value in field.values() {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_depth_data(bytes: &[u8]) -> Result<DisparityField> {
    let mut cursor = 0usize;
    let magic = read_slice(bytes, &mut cursor, 4)?;
    if magic != DEPTH_MAGIC {
        return Err(anyhow!("unrecognized depth data magic"));
    }
    let rows = read_u32(bytes, &mut cursor)? as usize;
    let cols = read_u32(bytes, &mut cursor)? as usize;
    if rows > MAX_FIELD_DIM || cols > MAX_FIELD_DIM {
        return Err(anyhow!(
            "depth data shape {}x{} exceeds maximum {}",
            rows,
            cols,
            MAX_FIELD_DIM
        ));
    }
    let body = &bytes[cursor..];
    let expected = rows * cols * 4;
    if body.len() != expected {
        return Err(anyhow!(
            "depth data length mismatch: expected {} bytes, got {}",
            expected,
            body.len()
        ));
    }
    let values = body
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    DisparityField::new(rows, cols, values)
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    let slice = read_slice(bytes, cursor, 4)?;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_slice<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    if *cursor + len > bytes.len() {
        return Err(anyhow!("truncated depth data"));
    }
    let out = &bytes[*cursor..*cursor + len];
    *cursor += len;
    Ok(out)
}
