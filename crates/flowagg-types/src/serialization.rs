//! Native-endian primitive I/O for spill files.
//!
//! Spill files are only ever read back by the process that wrote them, so
//! integers are stored in host byte order with no framing.

use std::io::{ErrorKind, Read, Write};

use crate::error::Result;

// --- Readers ---

pub fn read_u64(reader: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_ne_bytes(buf))
}

/// Fill `buf` completely, or report a clean end of stream.
///
/// Returns `Ok(false)` if the stream ended before the first byte and
/// `Ok(true)` once `buf` is full. A stream that ends part-way through
/// `buf` is an `UnexpectedEof` error.
pub fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(std::io::Error::from(ErrorKind::UnexpectedEof).into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

/// Read and discard exactly `len` bytes.
pub fn skip_bytes(reader: &mut impl Read, len: u64) -> Result<()> {
    let copied = std::io::copy(&mut reader.take(len), &mut std::io::sink())?;
    if copied != len {
        return Err(std::io::Error::from(ErrorKind::UnexpectedEof).into());
    }
    Ok(())
}

// --- Writers ---

pub fn write_u64(writer: &mut impl Write, v: u64) -> Result<()> {
    writer.write_all(&v.to_ne_bytes())?;
    Ok(())
}

pub fn write_bytes(writer: &mut impl Write, bytes: &[u8]) -> Result<()> {
    writer.write_all(bytes)?;
    Ok(())
}

// --- Fixed-width integers inside byte buffers ---

/// Decode an unsigned integer of `buf.len()` bytes (1..=8) in host order.
pub fn get_uint(buf: &[u8]) -> u64 {
    debug_assert!(!buf.is_empty() && buf.len() <= 8);
    let mut word = [0u8; 8];
    if cfg!(target_endian = "big") {
        word[8 - buf.len()..].copy_from_slice(buf);
    } else {
        word[..buf.len()].copy_from_slice(buf);
    }
    u64::from_ne_bytes(word)
}

/// Encode `v` into `buf` (1..=8 bytes) in host order, saturating at the
/// largest value the width can hold.
pub fn put_uint_saturating(buf: &mut [u8], v: u64) {
    debug_assert!(!buf.is_empty() && buf.len() <= 8);
    let width = buf.len();
    let max = max_uint(width);
    let word = v.min(max).to_ne_bytes();
    if cfg!(target_endian = "big") {
        buf.copy_from_slice(&word[8 - width..]);
    } else {
        buf.copy_from_slice(&word[..width]);
    }
}

/// Largest unsigned value representable in `width` bytes.
pub fn max_uint(width: usize) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (width * 8)) - 1
    }
}
