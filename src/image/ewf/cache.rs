//! LRU Chunk Cache for the EWF source (like libfcache)

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Chunk cache with LRU eviction
/// Uses Arc so hits hand out the buffer without copying it
pub(crate) struct ChunkCache {
    cache: HashMap<usize, Arc<Vec<u8>>>,
    lru_queue: VecDeque<usize>,
    max_entries: usize,
}

impl ChunkCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            cache: HashMap::new(),
            lru_queue: VecDeque::new(),
            max_entries,
        }
    }

    pub fn get(&mut self, chunk_index: usize) -> Option<Arc<Vec<u8>>> {
        let data = self.cache.get(&chunk_index)?;
        self.lru_queue.retain(|&x| x != chunk_index);
        self.lru_queue.push_front(chunk_index);
        Some(Arc::clone(data))
    }

    /// Store a chunk and return the shared buffer
    pub fn insert(&mut self, chunk_index: usize, data: Vec<u8>) -> Arc<Vec<u8>> {
        let data = Arc::new(data);
        if self.max_entries == 0 {
            return data;
        }

        if self.cache.len() >= self.max_entries && !self.cache.contains_key(&chunk_index) {
            if let Some(old_index) = self.lru_queue.pop_back() {
                self.cache.remove(&old_index);
            }
        }

        self.lru_queue.retain(|&x| x != chunk_index);
        self.lru_queue.push_front(chunk_index);
        self.cache.insert(chunk_index, Arc::clone(&data));
        data
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.lru_queue.clear();
    }
}
