//! Raw deflate codec. Every chunk is an independent deflate stream with no
//! zlib or gzip wrapper, so chunks decode in any order.

use bytemuck::{Pod, Zeroable};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::codec::{Codec, Format};
use crate::{BatchError, ChunkStatus, Device, Result};

const COMP_BLOCKS_PER_UNIT: u32 = 1;
const DECOMP_BLOCKS_PER_UNIT: u32 = 4;

/// Compression level used when none is given.
pub const DEFAULT_LEVEL: u8 = 6;
const MAX_LEVEL: u8 = 9;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DeflateFormatHeader {
    pub level: u8,
    pub reserved: [u8; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deflate {
    level: u8,
}

impl Default for Deflate {
    fn default() -> Self {
        Self { level: DEFAULT_LEVEL }
    }
}

impl Deflate {
    pub fn new(level: u8) -> Result<Self> {
        if level > MAX_LEVEL {
            return Err(BatchError::Config(format!(
                "deflate level {level} out of range (0..={MAX_LEVEL})"
            )));
        }
        Ok(Self { level })
    }

    pub fn level(&self) -> u8 {
        self.level
    }
}

impl Codec for Deflate {
    type FormatHeader = DeflateFormatHeader;

    const FORMAT: Format = Format::Deflate;

    fn format_header(&self) -> DeflateFormatHeader {
        DeflateFormatHeader {
            level: self.level,
            reserved: [0; 3],
        }
    }

    fn from_format_header(header: &DeflateFormatHeader) -> Result<Self> {
        Self::new(header.level)
    }

    // miniz's deflateBound: stored blocks cost five bytes per block, plus a
    // fixed margin for the final block and bit flush.
    fn compute_max_compressed_chunk_size(&self, chunk_size: usize) -> usize {
        let stored = chunk_size + (chunk_size / (31 * 1024) + 1) * 5;
        128 + stored.max(chunk_size * 110 / 100)
    }

    fn compute_compression_occupancy(&self, device: &Device) -> u32 {
        device.occupancy(COMP_BLOCKS_PER_UNIT)
    }

    fn compute_decompression_occupancy(&self, device: &Device) -> u32 {
        device.occupancy(DECOMP_BLOCKS_PER_UNIT)
    }

    fn compress_chunk(
        &self,
        input: &[u8],
        output: &mut [u8],
        _workspace: &mut [u64],
    ) -> std::result::Result<usize, ChunkStatus> {
        let mut compress = Compress::new(Compression::new(self.level as u32), false);
        match compress.compress(input, output, FlushCompress::Finish) {
            Ok(Status::StreamEnd) => Ok(compress.total_out() as usize),
            Ok(_) | Err(_) => Err(ChunkStatus::OutputBufferTooSmall),
        }
    }

    fn decompress_chunk(
        &self,
        input: &[u8],
        output: &mut [u8],
        _workspace: &mut [u64],
    ) -> std::result::Result<usize, ChunkStatus> {
        let mut decompress = Decompress::new(false);
        match decompress.decompress(input, output, FlushDecompress::Finish) {
            Ok(Status::StreamEnd) => Ok(decompress.total_out() as usize),
            Ok(_) | Err(_) => Err(ChunkStatus::CannotDecompress),
        }
    }
}
