// Shared binary reading utilities for container, partition and filesystem parsers
//
// Two flavours: seek+read against a file (EWF section walking) and bounds-checked
// little-endian decoding out of an in-memory sector buffer.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use crate::error::{ExtractError, ExtractResult};

// =============================================================================
// File Reads (seek + read)
// =============================================================================

/// Read exact bytes at specific offset
pub fn read_bytes_at(file: &mut File, offset: u64, length: usize) -> ExtractResult<Vec<u8>> {
    if length == 0 {
        return Ok(Vec::new());
    }
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| ExtractError::Read(format!("Failed to seek to offset {}: {}", offset, e)))?;
    let mut buf = vec![0u8; length];
    file.read_exact(&mut buf)
        .map_err(|e| ExtractError::Read(format!("Failed to read {} bytes at {}: {}", length, offset, e)))?;
    Ok(buf)
}

/// Fill `buf` from `offset`, returning the number of bytes read (short only at EOF)
pub fn read_up_to_at(file: &mut File, offset: u64, buf: &mut [u8]) -> ExtractResult<usize> {
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| ExtractError::Read(format!("Failed to seek to offset {}: {}", offset, e)))?;

    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])
            .map_err(|e| ExtractError::Read(format!("Read failed at {}: {}", offset + filled as u64, e)))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// =============================================================================
// Buffer Decoding
// =============================================================================

fn slice_at(buf: &[u8], offset: usize, len: usize) -> ExtractResult<&[u8]> {
    buf.get(offset..offset + len).ok_or_else(|| {
        ExtractError::Read(format!(
            "Structure truncated: need {} bytes at offset {}, have {}",
            len,
            offset,
            buf.len()
        ))
    })
}

/// Little-endian u16 at `offset` in `buf`
pub fn le_u16(buf: &[u8], offset: usize) -> ExtractResult<u16> {
    let b = slice_at(buf, offset, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

/// Little-endian u32 at `offset` in `buf`
pub fn le_u32(buf: &[u8], offset: usize) -> ExtractResult<u32> {
    let b = slice_at(buf, offset, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Little-endian u64 at `offset` in `buf`
pub fn le_u64(buf: &[u8], offset: usize) -> ExtractResult<u64> {
    let b = slice_at(buf, offset, 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(b);
    Ok(u64::from_le_bytes(raw))
}

/// Fixed-size byte array at `offset` in `buf`
pub fn array_at<const N: usize>(buf: &[u8], offset: usize) -> ExtractResult<[u8; N]> {
    let b = slice_at(buf, offset, N)?;
    let mut raw = [0u8; N];
    raw.copy_from_slice(b);
    Ok(raw)
}

/// Convert bytes to null-terminated string
pub fn bytes_to_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).to_string()
}
