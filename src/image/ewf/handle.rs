//! EwfSource - chunk-level access to an E01 segment set (like libewf_handle)

use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use flate2::read::ZlibDecoder;
use tracing::{debug, trace, warn};

use crate::common::{
    binary::{bytes_to_string, le_u32, le_u64, read_bytes_at},
    segments::discover_ewf_segments,
    FileIoPool,
};
use crate::config::ScanConfig;
use crate::error::{ExtractError, ExtractResult};
use crate::image::ImageSource;

use super::cache::ChunkCache;
use super::types::*;

// =============================================================================
// EWF Source - Main Interface (like libewf_handle)
// =============================================================================

pub struct EwfSource {
    /// File I/O pool managing all segment files
    file_pool: FileIoPool,
    /// Volume information from the first volume/disk section
    volume: VolumeSection,
    /// Global chunk table: chunk_index -> storage location
    chunk_table: Vec<ChunkLocation>,
    chunk_cache: ChunkCache,
}

impl EwfSource {
    /// Open an E01 file set (like libewf_handle_open)
    pub fn open(path: &Path, config: &ScanConfig) -> ExtractResult<Self> {
        Self::open_inner(path, config).map_err(|e| match e {
            ExtractError::ImageOpen(_) | ExtractError::NotFound(_) => e,
            other => ExtractError::ImageOpen(other.to_string()),
        })
    }

    fn open_inner(path: &Path, config: &ScanConfig) -> ExtractResult<Self> {
        // Step 1: Discover all segment files (like libewf_glob)
        let segment_paths = discover_ewf_segments(path)?;

        // Step 2: Create file I/O pool
        let mut file_pool = FileIoPool::new(segment_paths, config.max_open_segments)?;

        // Step 3: Walk every segment's section chain
        let mut volume: Option<VolumeSection> = None;
        let mut chunk_table = Vec::new();
        let segment_count = file_pool.file_count();

        for seg_idx in 0..segment_count {
            let reached_done = Self::parse_segment(&mut file_pool, seg_idx, &mut volume, &mut chunk_table)?;
            if reached_done {
                if seg_idx + 1 < segment_count {
                    debug!(seg_idx, segment_count, "'done' section before last segment, ignoring the rest");
                }
                break;
            }
        }

        let volume = volume.ok_or_else(|| ExtractError::ImageOpen("No volume section found".to_string()))?;
        volume.validate()?;

        let expected_chunks = volume.media_size().div_ceil(volume.chunk_size() as u64);
        if (chunk_table.len() as u64) < expected_chunks {
            warn!(
                stored = chunk_table.len(),
                expected = expected_chunks,
                "Chunk table shorter than media, missing chunks read as zeros"
            );
        }

        debug!(
            segments = segment_count,
            chunks = chunk_table.len(),
            chunk_size = volume.chunk_size(),
            media_size = volume.media_size(),
            "Opened EWF image"
        );

        // Step 4: Chunk cache
        let chunk_cache = ChunkCache::new(config.chunk_cache_entries);

        Ok(Self {
            file_pool,
            volume,
            chunk_table,
            chunk_cache,
        })
    }

    /// Walk one segment's section chain. Returns true when 'done' is reached.
    fn parse_segment(
        file_pool: &mut FileIoPool,
        seg_idx: usize,
        volume: &mut Option<VolumeSection>,
        chunk_table: &mut Vec<ChunkLocation>,
    ) -> ExtractResult<bool> {
        let segment_size = file_pool.file_sizes()[seg_idx];
        let file = file_pool.get_file(seg_idx)?;

        let signature = read_bytes_at(file, 0, EWF_SIGNATURE.len())?;
        if signature.as_slice() == EWF2_SIGNATURE {
            return Err(ExtractError::ImageOpen(
                "EWF v2 (Ex01) containers are not supported".to_string(),
            ));
        }
        if signature.as_slice() != EWF_SIGNATURE {
            return Err(ExtractError::ImageOpen(format!(
                "Segment {} is missing the EVF signature",
                seg_idx + 1
            )));
        }

        let mut offset = FILE_HEADER_SIZE;
        for _ in 0..MAX_SECTIONS_PER_SEGMENT {
            if offset + SECTION_DESCRIPTOR_SIZE > segment_size {
                trace!(seg_idx, offset, "Section chain ran past end of segment");
                return Ok(false);
            }

            let descriptor = Self::read_section_descriptor(file, offset)?;
            let data_offset = offset + SECTION_DESCRIPTOR_SIZE;
            trace!(
                seg_idx,
                offset,
                section = %descriptor.section_type,
                size = descriptor.size,
                "Section"
            );

            match descriptor.section_type.as_str() {
                "volume" | "disk" => {
                    if volume.is_none() {
                        *volume = Some(Self::read_volume_section(file, data_offset)?);
                    }
                }
                "table" => {
                    let (base_offset, offsets) =
                        Self::read_table_section(file, data_offset, descriptor.size, segment_size)?;
                    trace!(entries = offsets.len(), base_offset, "Table section");
                    chunk_table.extend(offsets.into_iter().map(|raw| ChunkLocation {
                        segment_index: seg_idx,
                        // An offset past the segment end fails on read
                        file_offset: base_offset.saturating_add(u64::from(raw & OFFSET_MASK)),
                        compressed: raw & COMPRESSED_FLAG != 0,
                    }));
                }
                "table2" => {
                    trace!("Skipping table2 section (mirror of table)");
                }
                "done" => return Ok(true),
                "next" => return Ok(false),
                _ => {}
            }

            if descriptor.next_offset <= offset {
                trace!(seg_idx, "Section chain ended");
                return Ok(false);
            }
            offset = descriptor.next_offset;
        }

        warn!(seg_idx, "Section limit reached, stopping segment walk");
        Ok(false)
    }

    /// Number of chunks stored in the table
    pub fn stored_chunk_count(&self) -> usize {
        self.chunk_table.len()
    }

    /// Logical length of chunk `chunk_index` (the last one may be short)
    fn chunk_len(&self, chunk_index: usize) -> usize {
        let chunk_size = self.volume.chunk_size() as u64;
        let start = chunk_index as u64 * chunk_size;
        self.volume.media_size().saturating_sub(start).min(chunk_size) as usize
    }

    /// Read a chunk by global index (like libewf_handle_read_buffer)
    pub fn read_chunk(&mut self, chunk_index: usize) -> ExtractResult<Arc<Vec<u8>>> {
        if let Some(cached) = self.chunk_cache.get(chunk_index) {
            return Ok(cached);
        }

        let expected_len = self.chunk_len(chunk_index);
        if expected_len == 0 {
            return Err(ExtractError::Read(format!("Chunk {} is beyond the end of media", chunk_index)));
        }

        let data = match self.chunk_table.get(chunk_index).copied() {
            Some(location) => self.load_chunk(chunk_index, location, expected_len)?,
            None => {
                warn!(chunk_index, "Chunk missing from table, zero-filling");
                vec![0u8; expected_len]
            }
        };

        Ok(self.chunk_cache.insert(chunk_index, data))
    }

    fn load_chunk(&mut self, chunk_index: usize, location: ChunkLocation, expected_len: usize) -> ExtractResult<Vec<u8>> {
        let chunk_size = self.volume.chunk_size();
        let file = self.file_pool.get_file(location.segment_index)?;

        if !location.compressed {
            return read_bytes_at(file, location.file_offset, expected_len);
        }

        file.seek(SeekFrom::Start(location.file_offset)).map_err(|e| {
            ExtractError::Read(format!(
                "Seek to chunk {} at offset {} failed: {}",
                chunk_index, location.file_offset, e
            ))
        })?;

        let buffered = BufReader::with_capacity(65536, file.take(chunk_size as u64 * 2));
        let mut decoder = ZlibDecoder::new(buffered);
        let mut data = Vec::with_capacity(chunk_size);
        decoder.read_to_end(&mut data).map_err(|e| {
            ExtractError::Read(format!(
                "Chunk {} decompression failed at offset {}: {}",
                chunk_index, location.file_offset, e
            ))
        })?;

        if data.len() != expected_len {
            if data.len() < expected_len {
                warn!(chunk_index, got = data.len(), expected_len, "Short chunk, zero-padding");
            }
            data.resize(expected_len, 0);
        }
        Ok(data)
    }

    // =========================================================================
    // Section Reading Helper Methods
    // =========================================================================

    fn read_section_descriptor(file: &mut std::fs::File, offset: u64) -> ExtractResult<SectionDescriptor> {
        let raw = read_bytes_at(file, offset, 32)?;
        Ok(SectionDescriptor {
            section_type: bytes_to_string(&raw[..16]),
            next_offset: le_u64(&raw, 16)?,
            size: le_u64(&raw, 24)?,
        })
    }

    fn read_volume_section(file: &mut std::fs::File, offset: u64) -> ExtractResult<VolumeSection> {
        let raw = read_bytes_at(file, offset, 24)?;

        // Bytes 0..4 are media type + padding
        let volume = VolumeSection {
            chunk_count: le_u32(&raw, 4)?,
            sectors_per_chunk: le_u32(&raw, 8)?,
            bytes_per_sector: le_u32(&raw, 12)?,
            sector_count: le_u64(&raw, 16)?,
        };

        trace!(
            chunk_count = volume.chunk_count,
            sectors_per_chunk = volume.sectors_per_chunk,
            bytes_per_sector = volume.bytes_per_sector,
            sector_count = volume.sector_count,
            "Volume section"
        );
        Ok(volume)
    }

    /// Returns the table's base offset and its raw 32-bit entries
    fn read_table_section(
        file: &mut std::fs::File,
        offset: u64,
        section_size: u64,
        segment_size: u64,
    ) -> ExtractResult<(u64, Vec<u32>)> {
        let header = read_bytes_at(file, offset, TABLE_HEADER_SIZE)?;
        let entry_count = le_u32(&header, 0)? as u64;
        let base_offset = le_u64(&header, 8)?;

        // Older writers leave entry_count at zero; derive it from the section size
        let by_size = section_size.saturating_sub(SECTION_DESCRIPTOR_SIZE + TABLE_HEADER_SIZE as u64 + 4) / 4;
        let in_file = segment_size.saturating_sub(offset + TABLE_HEADER_SIZE as u64) / 4;
        let limit = by_size.min(in_file);
        let count = if entry_count > 0 { entry_count.min(limit) } else { limit };
        if entry_count > count {
            warn!(entry_count, count, "Table entry count exceeds its section, clamping");
        }

        let raw = read_bytes_at(file, offset + TABLE_HEADER_SIZE as u64, count as usize * 4)?;
        let offsets = raw
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok((base_offset, offsets))
    }
}

impl ImageSource for EwfSource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> ExtractResult<usize> {
        let chunk_size = self.volume.chunk_size() as u64;
        let media_size = self.volume.media_size();
        let mut filled = 0;

        while filled < buf.len() {
            let position = offset + filled as u64;
            if position >= media_size {
                break;
            }
            let chunk_index = (position / chunk_size) as usize;
            let within = (position % chunk_size) as usize;

            let chunk = self.read_chunk(chunk_index)?;
            if within >= chunk.len() {
                break;
            }
            let n = (chunk.len() - within).min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&chunk[within..within + n]);
            filled += n;
        }

        Ok(filled)
    }

    fn size(&self) -> u64 {
        self.volume.media_size()
    }

    fn close(&mut self) {
        self.chunk_cache.clear();
        self.file_pool.close_all();
    }
}
