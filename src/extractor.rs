//! Chunked content recovery for matched files

use tracing::{debug, warn};

use crate::error::ExtractResult;
use crate::fs::{FileSystem, NodeRef};
use crate::walker::FileMatch;

/// Upper bound on the up-front allocation for a declared size
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

/// Recover a matched file's content; `None` when a read fails
pub fn extract(fs: &mut dyn FileSystem, file: &FileMatch, chunk_size: usize) -> Option<Vec<u8>> {
    match read_content(fs, file.node, file.size, chunk_size) {
        Ok(data) => {
            debug!(path = %file.full_path, declared = file.size, recovered = data.len(), "Extracted file");
            Some(data)
        }
        Err(e) => {
            warn!(path = %file.full_path, error = %e, "Failed to extract file");
            None
        }
    }
}

/// Read `size` bytes in `chunk_size` pieces, stopping early on an empty read
pub fn read_content(fs: &mut dyn FileSystem, node: NodeRef, size: u64, chunk_size: usize) -> ExtractResult<Vec<u8>> {
    let chunk_size = chunk_size.max(1) as u64;
    let mut data = Vec::with_capacity(size.min(MAX_PREALLOCATION) as usize);
    let mut offset = 0u64;

    while offset < size {
        let want = (size - offset).min(chunk_size) as usize;
        let mut chunk = fs.read_at(node, offset, want)?;
        if chunk.is_empty() {
            debug!(offset, size, "Content ended before declared size");
            break;
        }
        chunk.truncate(want);
        offset += chunk.len() as u64;
        data.extend_from_slice(&chunk);
    }

    Ok(data)
}
