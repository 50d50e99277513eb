// Shared File I/O Pool for managing multiple segment file handles
//
// Provides LRU caching for file handles when working with multi-segment
// forensic images (E01, split RAW) to avoid exceeding OS file descriptor limits.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::path::PathBuf;
use tracing::{debug, trace};

use crate::error::{ExtractError, ExtractResult};

// =============================================================================
// File I/O Pool - Like libbfio_pool
// =============================================================================

/// Manages multiple file handles with LRU caching
/// Limits number of simultaneously open files to avoid OS limits
pub struct FileIoPool {
    /// Paths to all segment files in order
    file_paths: Vec<PathBuf>,
    /// Size of every segment, same order as `file_paths`
    file_sizes: Vec<u64>,
    /// Currently open file handles (file_index -> File)
    open_handles: HashMap<usize, File>,
    /// LRU queue for file handle management
    lru_queue: VecDeque<usize>,
    /// Maximum number of simultaneously open files
    max_open: usize,
}

impl FileIoPool {
    /// Create a pool over `file_paths`, reading each segment's size up front
    pub fn new(file_paths: Vec<PathBuf>, max_open: usize) -> ExtractResult<Self> {
        let mut file_sizes = Vec::with_capacity(file_paths.len());
        for path in &file_paths {
            let size = std::fs::metadata(path)
                .map_err(|e| ExtractError::ImageOpen(format!("Failed to stat segment {}: {}", path.display(), e)))?
                .len();
            file_sizes.push(size);
        }

        Ok(Self {
            file_paths,
            file_sizes,
            open_handles: HashMap::new(),
            lru_queue: VecDeque::new(),
            max_open: max_open.max(1),
        })
    }

    /// Get a file handle, opening it if necessary and managing LRU cache
    pub fn get_file(&mut self, file_index: usize) -> ExtractResult<&mut File> {
        if file_index >= self.file_paths.len() {
            return Err(ExtractError::Read(format!(
                "File index {} out of range (have {} files)",
                file_index,
                self.file_paths.len()
            )));
        }

        if self.open_handles.contains_key(&file_index) {
            self.lru_queue.retain(|&x| x != file_index);
            self.lru_queue.push_front(file_index);
            trace!(file_index, "File handle cache hit");
        } else {
            if self.open_handles.len() >= self.max_open {
                if let Some(lru_index) = self.lru_queue.pop_back() {
                    trace!(lru_index, "Evicting LRU file handle");
                    self.open_handles.remove(&lru_index);
                }
            }

            let file_path = &self.file_paths[file_index];
            debug!(file_index, ?file_path, "Opening file handle");
            let file = File::open(file_path)
                .map_err(|e| ExtractError::Read(format!("Failed to open segment {}: {}", file_index, e)))?;

            self.open_handles.insert(file_index, file);
            self.lru_queue.push_front(file_index);
        }

        self.open_handles
            .get_mut(&file_index)
            .ok_or_else(|| ExtractError::Read(format!("Segment {} handle missing from pool", file_index)))
    }

    /// Get the number of files in the pool
    pub fn file_count(&self) -> usize {
        self.file_paths.len()
    }

    pub fn file_sizes(&self) -> &[u64] {
        &self.file_sizes
    }

    /// Sum of all segment sizes
    pub fn total_size(&self) -> u64 {
        self.file_sizes.iter().sum()
    }

    /// Get the number of currently open handles
    pub fn open_count(&self) -> usize {
        self.open_handles.len()
    }

    /// Close all open file handles
    pub fn close_all(&mut self) {
        if !self.open_handles.is_empty() {
            debug!(open = self.open_handles.len(), "Closing segment file handles");
        }
        self.open_handles.clear();
        self.lru_queue.clear();
    }

    /// Map a position in the concatenated segment space to (segment, offset)
    pub fn locate(&self, position: u64) -> Option<(usize, u64)> {
        let mut remaining = position;
        for (idx, &size) in self.file_sizes.iter().enumerate() {
            if remaining < size {
                return Some((idx, remaining));
            }
            remaining -= size;
        }
        None
    }
}
