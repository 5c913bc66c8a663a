use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{BatchError, ChecksumMode, Result};

/// Chunk size used when none is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 16;

/// Per-manager configuration shared by every codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Uncompressed bytes per chunk.
    pub chunk_size: usize,
    pub checksum_mode: ChecksumMode,
    /// Device the manager's stream must belong to.
    pub device_id: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            checksum_mode: ChecksumMode::default(),
            device_id: 0,
        }
    }
}

impl BatchConfig {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size, ..Self::default() }
    }

    pub fn with_checksum_mode(mut self, mode: ChecksumMode) -> Self {
        self.checksum_mode = mode;
        self
    }

    pub fn with_device_id(mut self, device_id: usize) -> Self {
        self.device_id = device_id;
        self
    }

    /// Load a configuration from a JSON document. Missing fields take their
    /// defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        if config.chunk_size == 0 {
            return Err(BatchError::Config("chunk_size must be positive".into()));
        }
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
