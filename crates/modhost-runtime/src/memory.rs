//! Bounds-checked access to guest linear memory.
//!
//! Guest code passes raw `(offset, length)` pairs across the ABI.  These
//! helpers treat every pair as untrusted input: negative values, overflowing
//! ranges, and ranges past the end of memory all fail closed with
//! [`RuntimeError::OutOfBounds`] before a single byte is touched.

use crate::error::{Result, RuntimeError};

/// Read `len` bytes starting at `offset`.
pub fn read_bytes(data: &[u8], offset: i32, len: i32) -> Result<Vec<u8>> {
    let range = checked_range(offset, len, data.len())?;
    Ok(data[range].to_vec())
}

/// Read `len` bytes starting at `offset` and decode them as UTF-8.
pub fn read_string(data: &[u8], offset: i32, len: i32) -> Result<String> {
    let range = checked_range(offset, len, data.len())?;
    let s = std::str::from_utf8(&data[range])?;
    Ok(s.to_owned())
}

/// Copy `src` into guest memory at `offset`, truncated to `capacity` bytes.
///
/// The destination capacity is guest-supplied; writes never exceed it and
/// never exceed `src`.  Returns the number of bytes actually written.
pub fn write_bytes(data: &mut [u8], offset: i32, src: &[u8], capacity: i32) -> Result<usize> {
    let capacity = usize::try_from(capacity).map_err(|_| RuntimeError::OutOfBounds {
        offset: i64::from(offset),
        len: i64::from(capacity),
        size: data.len(),
    })?;
    let count = src.len().min(capacity);
    let range = checked_range(offset, count as i32, data.len())?;
    data[range].copy_from_slice(&src[..count]);
    Ok(count)
}

/// Validate that `[offset, offset + len)` lies within a memory of `size`
/// bytes and convert it to a slice range.
fn checked_range(offset: i32, len: i32, size: usize) -> Result<std::ops::Range<usize>> {
    let oob = || RuntimeError::OutOfBounds {
        offset: i64::from(offset),
        len: i64::from(len),
        size,
    };
    let start = usize::try_from(offset).map_err(|_| oob())?;
    let count = usize::try_from(len).map_err(|_| oob())?;
    let end = start.checked_add(count).ok_or_else(oob)?;
    if end > size {
        return Err(oob());
    }
    Ok(start..end)
}
