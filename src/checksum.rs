//! Checksum modes and the CRC-32 helpers used for per-chunk integrity.

use serde::{Deserialize, Serialize};

use crate::BatchError;

/// Tri-state checksum policy carried by every manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumMode {
    /// No checksum written, no check performed.
    #[default]
    NoComputeNoVerify,
    /// Checksums computed and stored; ignored on decompression.
    ComputeAndNoVerify,
    /// Checksums computed, stored and verified per chunk on decompression.
    ComputeAndVerify,
}

impl ChecksumMode {
    /// Whether compression writes the checksum tables.
    pub fn computes(self) -> bool {
        !matches!(self, ChecksumMode::NoComputeNoVerify)
    }

    /// Whether decompression compares against the stored checksums.
    pub fn verifies(self) -> bool {
        matches!(self, ChecksumMode::ComputeAndVerify)
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            ChecksumMode::NoComputeNoVerify => 0,
            ChecksumMode::ComputeAndNoVerify => 1,
            ChecksumMode::ComputeAndVerify => 2,
        }
    }
}

impl TryFrom<u8> for ChecksumMode {
    type Error = BatchError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ChecksumMode::NoComputeNoVerify),
            1 => Ok(ChecksumMode::ComputeAndNoVerify),
            2 => Ok(ChecksumMode::ComputeAndVerify),
            other => Err(BatchError::Header(format!("unknown checksum mode {other}"))),
        }
    }
}

impl std::str::FromStr for ChecksumMode {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "no_compute_no_verify" => Ok(ChecksumMode::NoComputeNoVerify),
            "compute" | "compute_and_no_verify" => Ok(ChecksumMode::ComputeAndNoVerify),
            "verify" | "compute_and_verify" => Ok(ChecksumMode::ComputeAndVerify),
            other => Err(BatchError::InvalidArgument(format!(
                "unknown checksum mode '{other}' (expected none, compute or verify)"
            ))),
        }
    }
}

/// CRC-32 (IEEE) of a byte slice.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
