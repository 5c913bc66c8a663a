use std::ops::Range;

/// Maps an input buffer onto fixed-size chunks.
///
/// Every chunk is `chunk_size` bytes except possibly the last, which holds
/// the remainder. An empty input has zero chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkMap {
    input_size: usize,
    chunk_size: usize,
}

impl ChunkMap {
    /// Create a map over `input_size` bytes. `chunk_size` must be non-zero;
    /// managers validate that at configuration time.
    pub fn new(input_size: usize, chunk_size: usize) -> Self {
        debug_assert!(chunk_size > 0, "chunk size must be non-zero");
        Self { input_size, chunk_size }
    }

    /// Number of chunks implied by this map.
    pub fn chunk_count(&self) -> usize {
        if self.input_size == 0 { 0 } else { (self.input_size - 1) / self.chunk_size + 1 }
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Byte range of chunk `index` in the input, `None` past the end.
    pub fn chunk_range(&self, index: usize) -> Option<Range<usize>> {
        if index >= self.chunk_count() {
            return None;
        }
        let start = index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.input_size);
        Some(start..end)
    }

    /// Length of chunk `index`, zero past the end.
    pub fn chunk_len(&self, index: usize) -> usize {
        self.chunk_range(index).map_or(0, |r| r.len())
    }
}
