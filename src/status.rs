use std::fmt;

/// Outcome of one chunk within a batched operation.
///
/// Reported through a status buffer, one entry per chunk, and only
/// meaningful after the stream the operation ran on has been synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChunkStatus {
    #[default]
    Success,
    /// Chunk data is malformed, truncated or decodes to the wrong length.
    CannotDecompress,
    /// Stored checksum does not match the recomputed one.
    ChecksumMismatch,
    /// Destination slot cannot hold the chunk.
    OutputBufferTooSmall,
}

impl ChunkStatus {
    pub fn is_success(self) -> bool {
        self == ChunkStatus::Success
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChunkStatus::Success => "success",
            ChunkStatus::CannotDecompress => "cannot decompress",
            ChunkStatus::ChecksumMismatch => "checksum mismatch",
            ChunkStatus::OutputBufferTooSmall => "output buffer too small",
        };
        f.write_str(s)
    }
}

/// Count of failed chunks in a status array.
pub fn count_failures(statuses: &[ChunkStatus]) -> usize {
    statuses.iter().filter(|s| !s.is_success()).count()
}
