//! Little-endian byte readers and writers shared by the header, protocol and
//! preprocessing code.
use crate::error::OutOfRange;

/// Read a 32-bit little-endian unsigned integer from `bytes` at `off`.
///
/// Returns `Err(OutOfRange)` when fewer than four bytes are available.
pub fn read_u32_le_at(bytes: &[u8], off: usize) -> Result<u32, OutOfRange> {
    let slice = read_slice(bytes, off, 4)?;
    let mut tmp: [u8; 4] = [0; 4];
    tmp.copy_from_slice(slice);
    Ok(u32::from_le_bytes(tmp))
}

/// Read a 16-bit little-endian unsigned integer from `bytes` at `off`.
pub fn read_u16_le_at(bytes: &[u8], off: usize) -> Result<u16, OutOfRange> {
    let slice = read_slice(bytes, off, 2)?;
    Ok(u16::from_le_bytes([slice[0], slice[1]]))
}

/// Read a single byte from `bytes` at `off`.
pub fn read_u8_at(bytes: &[u8], off: usize) -> Result<u8, OutOfRange> {
    bytes.get(off).copied().ok_or(OutOfRange {
        offset: off,
        needed: 1,
        available: bytes.len(),
    })
}

/// Return a borrowed slice of length `len` starting at `off` from `bytes`.
///
/// `available` in the error reports the bytes remaining from `off` to the end
/// of the buffer.
pub fn read_slice(bytes: &[u8], off: usize, len: usize) -> Result<&[u8], OutOfRange> {
    match off.checked_add(len) {
        Some(end) if end <= bytes.len() => Ok(&bytes[off..end]),
        _ => Err(OutOfRange {
            offset: off,
            needed: len,
            available: bytes.len().saturating_sub(off),
        }),
    }
}

/// Write a 32-bit little-endian unsigned integer `v` into `buf` at `off`.
///
/// Callers must ensure `buf[off..off + 4]` is in range.
pub fn write_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

/// Reverse the byte order of every 32-bit word in `data`.
///
/// A trailing partial word is left untouched.
pub fn swap_words(data: &mut [u8]) {
    for word in data.chunks_exact_mut(4) {
        word.reverse();
    }
}
