//! Bounds-checked little-endian read helpers.
//!
//! Reply parsing indexes into raw frames at fixed offsets; these helpers
//! turn out-of-range accesses into [`EtherNetIpError::Frame`] instead of
//! panics.

use crate::error::{EtherNetIpError, Result};

fn take<'a>(data: &'a [u8], pos: usize, len: usize) -> Result<&'a [u8]> {
    data.get(pos..pos + len).ok_or_else(|| {
        EtherNetIpError::Frame(format!(
            "reply truncated: need {} bytes at offset {}, have {}",
            len,
            pos,
            data.len()
        ))
    })
}

/// Reads a `u8` at `pos`.
pub fn read_u8(data: &[u8], pos: usize) -> Result<u8> {
    Ok(take(data, pos, 1)?[0])
}

/// Reads a little-endian `u16` at `pos`.
pub fn read_u16(data: &[u8], pos: usize) -> Result<u16> {
    let b = take(data, pos, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

/// Reads a little-endian `u32` at `pos`.
pub fn read_u32(data: &[u8], pos: usize) -> Result<u32> {
    let b = take(data, pos, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Reads a little-endian `u64` at `pos`.
pub fn read_u64(data: &[u8], pos: usize) -> Result<u64> {
    let b = take(data, pos, 8)?;
    Ok(u64::from_le_bytes([
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]))
}

/// Reads a little-endian unsigned integer of `width` bytes (1, 2, 4 or 8),
/// zero-extended to `u64`.
pub fn read_uint(data: &[u8], pos: usize, width: usize) -> Result<u64> {
    match width {
        1 => read_u8(data, pos).map(u64::from),
        2 => read_u16(data, pos).map(u64::from),
        4 => read_u32(data, pos).map(u64::from),
        8 => read_u64(data, pos),
        _ => Err(EtherNetIpError::Decode(format!(
            "unsupported integer width: {} bytes",
            width
        ))),
    }
}

/// Reads a little-endian `f32` at `pos`.
pub fn read_f32(data: &[u8], pos: usize) -> Result<f32> {
    read_u32(data, pos).map(f32::from_bits)
}

/// Reads a little-endian `f64` at `pos`.
pub fn read_f64(data: &[u8], pos: usize) -> Result<f64> {
    read_u64(data, pos).map(f64::from_bits)
}

/// Reads `len` raw bytes at `pos`.
pub fn read_bytes<'a>(data: &'a [u8], pos: usize, len: usize) -> Result<&'a [u8]> {
    take(data, pos, len)
}
