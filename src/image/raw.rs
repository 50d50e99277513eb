// RAW disk image source (.dd, .raw, .img, .001, .002, etc.)
// Supports single and multi-segment raw forensic images

use std::path::Path;
use tracing::debug;

use crate::common::{binary::read_up_to_at, segments::discover_numbered_segments, FileIoPool};
use crate::config::ScanConfig;
use crate::error::{ExtractError, ExtractResult};

use super::ImageSource;

/// Flat image made of one file or a concatenated numbered segment set
pub struct RawSource {
    pool: FileIoPool,
    total_size: u64,
}

impl RawSource {
    pub fn open(path: &Path, config: &ScanConfig) -> ExtractResult<Self> {
        let segments = discover_numbered_segments(path)?;
        let pool = FileIoPool::new(segments, config.max_open_segments)?;
        let total_size = pool.total_size();

        debug!(
            segment_count = pool.file_count(),
            total_size,
            "Opened raw image"
        );

        Ok(Self { pool, total_size })
    }

    pub fn segment_count(&self) -> usize {
        self.pool.file_count()
    }
}

impl ImageSource for RawSource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> ExtractResult<usize> {
        let mut total_read = 0;

        while total_read < buf.len() {
            let position = offset + total_read as u64;
            let Some((seg_idx, seg_offset)) = self.pool.locate(position) else {
                break;
            };

            let seg_remaining = self.pool.file_sizes()[seg_idx] - seg_offset;
            let to_read = (buf.len() - total_read).min(seg_remaining as usize);

            let file = self.pool.get_file(seg_idx)?;
            let n = read_up_to_at(file, seg_offset, &mut buf[total_read..total_read + to_read])?;
            if n == 0 {
                return Err(ExtractError::Read(format!(
                    "Segment {} shorter than expected at offset {}",
                    seg_idx, seg_offset
                )));
            }
            total_read += n;
        }

        Ok(total_read)
    }

    fn size(&self) -> u64 {
        self.total_size
    }

    fn close(&mut self) {
        self.pool.close_all();
    }
}
