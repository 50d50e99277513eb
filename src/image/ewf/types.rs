//! Type definitions for EWF format parsing

use crate::error::{ExtractError, ExtractResult};

// =============================================================================
// Core Constants
// =============================================================================

pub(crate) const EWF_SIGNATURE: &[u8; 8] = b"EVF\x09\x0d\x0a\xff\x00";
pub(crate) const EWF2_SIGNATURE: &[u8; 8] = b"EVF2\x0d\x0a\x81\x00";

/// Signature (8) + fields start (1) + segment number (2) + fields end (2)
pub(crate) const FILE_HEADER_SIZE: u64 = 13;
/// Type (16) + next (8) + size (8) + padding (40) + checksum (4)
pub(crate) const SECTION_DESCRIPTOR_SIZE: u64 = 76;
/// Entry count (4) + padding (4) + base offset (8) + padding (4) + checksum (4)
pub(crate) const TABLE_HEADER_SIZE: usize = 24;

pub(crate) const COMPRESSED_FLAG: u32 = 0x8000_0000;
pub(crate) const OFFSET_MASK: u32 = 0x7FFF_FFFF;

/// Guard against corrupt section chains that loop
pub(crate) const MAX_SECTIONS_PER_SEGMENT: u32 = 10_000;

/// Largest chunk accepted from a volume section (libewf caps chunks well below this)
pub(crate) const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;
pub(crate) const MAX_BYTES_PER_SECTOR: u32 = 64 * 1024;

// =============================================================================
// Section Descriptors - EWF Format Structures
// =============================================================================

#[derive(Clone, Debug)]
pub(crate) struct SectionDescriptor {
    pub section_type: String,
    /// Offset of the next descriptor, relative to the segment file start
    pub next_offset: u64,
    pub size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct VolumeSection {
    pub chunk_count: u32,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub sector_count: u64,
}

impl VolumeSection {
    /// Reject geometry that cannot describe real media
    pub fn validate(&self) -> ExtractResult<()> {
        let invalid = |msg: String| Err(ExtractError::ImageOpen(format!("Invalid volume geometry: {}", msg)));

        if self.sectors_per_chunk == 0 || self.bytes_per_sector == 0 {
            return invalid(format!(
                "{} sectors per chunk, {} bytes per sector",
                self.sectors_per_chunk, self.bytes_per_sector
            ));
        }
        if self.bytes_per_sector > MAX_BYTES_PER_SECTOR {
            return invalid(format!("{} bytes per sector", self.bytes_per_sector));
        }
        match (self.sectors_per_chunk as usize).checked_mul(self.bytes_per_sector as usize) {
            Some(size) if size <= MAX_CHUNK_SIZE => {}
            _ => {
                return invalid(format!(
                    "chunk of {} sectors of {} bytes is too large",
                    self.sectors_per_chunk, self.bytes_per_sector
                ))
            }
        }
        if self.sector_count.checked_mul(self.bytes_per_sector as u64).is_none() {
            return invalid(format!("{} sectors overflow the media size", self.sector_count));
        }
        Ok(())
    }

    /// Only meaningful once `validate` has passed
    pub fn chunk_size(&self) -> usize {
        self.sectors_per_chunk as usize * self.bytes_per_sector as usize
    }

    pub fn media_size(&self) -> u64 {
        self.sector_count.saturating_mul(self.bytes_per_sector as u64)
    }
}

// =============================================================================
// Chunk Location - Maps chunks to their storage location
// =============================================================================

#[derive(Clone, Copy, Debug)]
pub(crate) struct ChunkLocation {
    /// Segment file holding the chunk
    pub segment_index: usize,
    /// Absolute offset of the chunk data inside that segment file
    pub file_offset: u64,
    pub compressed: bool,
}
