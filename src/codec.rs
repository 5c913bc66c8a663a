//! The codec strategy contract every compression algorithm plugs into.

use std::fmt;
use std::str::FromStr;

use bytemuck::Pod;
use serde::{Deserialize, Serialize};

use crate::kernel::{self, CompressBatch, DecompressBatch};
use crate::{BatchError, ChunkStatus, Device, Result};

/// Largest uncompressed chunk any codec accepts.
pub const MAX_CHUNK_SIZE: usize = 1 << 24;

/// Algorithm identifier stored in every stream header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Format {
    Snappy = 1,
    Lz4 = 2,
    Cascaded = 3,
    #[serde(alias = "gdeflate")]
    Deflate = 4,
}

impl Format {
    pub fn name(self) -> &'static str {
        match self {
            Format::Snappy => "snappy",
            Format::Lz4 => "lz4",
            Format::Cascaded => "cascaded",
            Format::Deflate => "deflate",
        }
    }
}

impl TryFrom<u8> for Format {
    type Error = BatchError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Format::Snappy),
            2 => Ok(Format::Lz4),
            3 => Ok(Format::Cascaded),
            4 => Ok(Format::Deflate),
            other => Err(BatchError::Header(format!("unknown format id {other}"))),
        }
    }
}

impl FromStr for Format {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "snappy" => Ok(Format::Snappy),
            "lz4" => Ok(Format::Lz4),
            "cascaded" => Ok(Format::Cascaded),
            "deflate" | "gdeflate" => Ok(Format::Deflate),
            other => Err(BatchError::InvalidArgument(format!("invalid format '{other}'"))),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Element type a parameterized codec interprets its input as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    Char,
    Short,
    Int,
    LongLong,
}

impl DataType {
    /// Element width in bytes.
    pub fn width(self) -> usize {
        match self {
            DataType::Char => 1,
            DataType::Short => 2,
            DataType::Int => 4,
            DataType::LongLong => 8,
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            DataType::Char => 0,
            DataType::Short => 1,
            DataType::Int => 2,
            DataType::LongLong => 3,
        }
    }
}

impl TryFrom<u8> for DataType {
    type Error = BatchError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(DataType::Char),
            1 => Ok(DataType::Short),
            2 => Ok(DataType::Int),
            3 => Ok(DataType::LongLong),
            other => Err(BatchError::Header(format!("unknown data type {other}"))),
        }
    }
}

impl FromStr for DataType {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "char" => Ok(DataType::Char),
            "short" => Ok(DataType::Short),
            "int" => Ok(DataType::Int),
            "longlong" => Ok(DataType::LongLong),
            other => Err(BatchError::InvalidArgument(format!(
                "invalid data type '{other}' (expected char, short, int or longlong)"
            ))),
        }
    }
}

/// Algorithm-specific half of a batch manager.
///
/// A codec bounds compressed chunk sizes, reports how many chunks the device
/// can work on at once, and runs the batched kernels. The manager owns
/// everything else: chunking, buffer sizing, headers and dispatch.
///
/// Implementations must guarantee that `compress_chunk` never produces more
/// than `compute_max_compressed_chunk_size(chunk_size)` bytes for any input
/// of at most `chunk_size` bytes, and that `decompress_chunk` reports corrupt
/// input through a status instead of panicking.
pub trait Codec: Send + Sync + Sized + 'static {
    /// Parameter block stored after the common header. Zero-sized for
    /// codecs without parameters.
    type FormatHeader: Pod + fmt::Debug + PartialEq + Send + Sync;

    const FORMAT: Format;

    fn format_header(&self) -> Self::FormatHeader;

    /// Rebuild the codec from a stream's parameter block.
    fn from_format_header(header: &Self::FormatHeader) -> Result<Self>;

    fn validate_chunk_size(&self, chunk_size: usize) -> Result<()> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(BatchError::Config(format!(
                "{} does not support chunk size {chunk_size} (1..={MAX_CHUNK_SIZE})",
                Self::FORMAT
            )));
        }
        Ok(())
    }

    /// Worst-case compressed size of one chunk of at most `chunk_size` bytes.
    fn compute_max_compressed_chunk_size(&self, chunk_size: usize) -> usize;

    /// Chunks the compression kernel keeps in flight on `device`.
    fn compute_compression_occupancy(&self, device: &Device) -> u32;

    /// Chunks the decompression kernel keeps in flight on `device`.
    fn compute_decompression_occupancy(&self, device: &Device) -> u32;

    /// Per-worker scratch, in 64-bit words, for chunks of `chunk_size`.
    fn workspace_words(&self, _chunk_size: usize) -> usize {
        0
    }

    /// Compress one chunk into `output`, returning the bytes written.
    fn compress_chunk(
        &self,
        input: &[u8],
        output: &mut [u8],
        workspace: &mut [u64],
    ) -> std::result::Result<usize, ChunkStatus>;

    /// Decompress one chunk into `output`, returning the bytes written.
    fn decompress_chunk(
        &self,
        input: &[u8],
        output: &mut [u8],
        workspace: &mut [u64],
    ) -> std::result::Result<usize, ChunkStatus>;

    /// Compress every chunk of the batch in one parallel dispatch.
    fn do_batch_compress(&self, batch: CompressBatch<'_>) {
        kernel::batch_compress(self, batch)
    }

    /// Decompress every chunk of the batch in one parallel dispatch.
    fn do_batch_decompress(&self, batch: DecompressBatch<'_>) {
        kernel::batch_decompress(self, batch)
    }
}
