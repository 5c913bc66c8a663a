//! Compressed stream header and table layout.
//!
//! Every stream starts with a fixed 40 byte [`CommonHeader`], followed by the
//! codec's format header, the chunk tables and finally the packed chunk
//! data:
//!
//! ```text
//! [CommonHeader][format header][offsets u64 x n][sizes u64 x n]
//! [comp crc u32 x n][decomp crc u32 x n]   (only when checksums are computed)
//! [chunk 0][chunk 1]...
//! ```
//!
//! All integers are little endian. The common header is parsed first and is
//! enough on its own to size every table that follows.

use std::ops::Range;

use bytemuck::{Pod, Zeroable};

use crate::chunking::ChunkMap;
use crate::codec::Format;
use crate::{BatchError, ChecksumMode, Result};

/// Stream magic, `"CBAT"` read as a little endian word.
pub const MAGIC: u32 = u32::from_le_bytes(*b"CBAT");
/// Current stream format version.
pub const FORMAT_VERSION: u16 = 1;
/// Encoded size of [`CommonHeader`].
pub const COMMON_HEADER_SIZE: usize = std::mem::size_of::<CommonHeader>();

/// Fixed-layout metadata block at the start of every compressed stream.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct CommonHeader {
    pub magic: u32,
    pub version: u16,
    pub format: u8,
    pub checksum_mode: u8,
    pub format_header_size: u32,
    pub num_chunks: u32,
    pub uncompressed_chunk_size: u32,
    pub reserved: u32,
    pub compressed_total_size: u64,
    pub uncompressed_total_size: u64,
}

impl CommonHeader {
    /// Header for a stream about to be compressed. `compressed_total_size` is
    /// filled in once the batch has run.
    pub fn new(
        format: Format,
        checksum_mode: ChecksumMode,
        format_header_size: usize,
        chunks: &ChunkMap,
    ) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            format: format as u8,
            checksum_mode: checksum_mode.to_u8(),
            format_header_size: format_header_size as u32,
            num_chunks: chunks.chunk_count() as u32,
            uncompressed_chunk_size: chunks.chunk_size() as u32,
            reserved: 0,
            compressed_total_size: 0,
            uncompressed_total_size: chunks.input_size() as u64,
        }
    }

    fn swap_to_le(self) -> Self {
        Self {
            magic: self.magic.to_le(),
            version: self.version.to_le(),
            format: self.format,
            checksum_mode: self.checksum_mode,
            format_header_size: self.format_header_size.to_le(),
            num_chunks: self.num_chunks.to_le(),
            uncompressed_chunk_size: self.uncompressed_chunk_size.to_le(),
            reserved: self.reserved.to_le(),
            compressed_total_size: self.compressed_total_size.to_le(),
            uncompressed_total_size: self.uncompressed_total_size.to_le(),
        }
    }

    /// Write the header into the first [`COMMON_HEADER_SIZE`] bytes of `out`.
    pub fn write_to(&self, out: &mut [u8]) {
        let le = self.swap_to_le();
        out[..COMMON_HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&le));
    }

    pub fn to_bytes(&self) -> [u8; COMMON_HEADER_SIZE] {
        let mut out = [0u8; COMMON_HEADER_SIZE];
        self.write_to(&mut out);
        out
    }

    /// Decode and validate the header at the front of `data`.
    ///
    /// Parsing is pure: the same bytes always yield the same header.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < COMMON_HEADER_SIZE {
            return Err(BatchError::Header(format!(
                "stream of {} bytes is shorter than the {COMMON_HEADER_SIZE} byte header",
                data.len()
            )));
        }
        let raw: CommonHeader = bytemuck::pod_read_unaligned(&data[..COMMON_HEADER_SIZE]);
        let header = raw.swap_to_le();
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(BatchError::Header("bad magic, not a chunkbatch stream".into()));
        }
        if self.version != FORMAT_VERSION {
            return Err(BatchError::Header(format!("unsupported version {}", self.version)));
        }
        Format::try_from(self.format)?;
        ChecksumMode::try_from(self.checksum_mode)?;
        if self.uncompressed_chunk_size == 0 {
            return Err(BatchError::Header("zero chunk size".into()));
        }
        let expected = self
            .uncompressed_total_size
            .div_ceil(self.uncompressed_chunk_size as u64);
        if expected != self.num_chunks as u64 {
            return Err(BatchError::Header(format!(
                "chunk count {} does not cover {} bytes in {} byte chunks",
                self.num_chunks, self.uncompressed_total_size, self.uncompressed_chunk_size
            )));
        }
        let payload_start = self.layout().payload_start() as u64;
        if self.compressed_total_size < payload_start {
            return Err(BatchError::Header(format!(
                "compressed size {} smaller than header and tables ({payload_start})",
                self.compressed_total_size
            )));
        }
        Ok(())
    }

    pub fn format(&self) -> Result<Format> {
        Format::try_from(self.format)
    }

    pub fn checksum_mode(&self) -> Result<ChecksumMode> {
        ChecksumMode::try_from(self.checksum_mode)
    }

    pub fn chunk_map(&self) -> ChunkMap {
        ChunkMap::new(
            self.uncompressed_total_size as usize,
            self.uncompressed_chunk_size as usize,
        )
    }

    /// Table layout described by this header.
    pub fn layout(&self) -> StreamLayout {
        StreamLayout {
            format_header_size: self.format_header_size as usize,
            num_chunks: self.num_chunks as usize,
            checksums: self.checksum_mode != ChecksumMode::NoComputeNoVerify.to_u8(),
        }
    }
}

/// Byte positions of the regions that follow the common header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLayout {
    pub format_header_size: usize,
    pub num_chunks: usize,
    pub checksums: bool,
}

impl StreamLayout {
    pub fn format_header(&self) -> Range<usize> {
        COMMON_HEADER_SIZE..COMMON_HEADER_SIZE + self.format_header_size
    }

    pub fn offsets(&self) -> Range<usize> {
        let start = self.format_header().end;
        start..start + self.num_chunks * 8
    }

    pub fn sizes(&self) -> Range<usize> {
        let start = self.offsets().end;
        start..start + self.num_chunks * 8
    }

    /// CRC-32 of each compressed chunk. Empty when checksums are off.
    pub fn comp_checksums(&self) -> Range<usize> {
        let start = self.sizes().end;
        if self.checksums {
            start..start + self.num_chunks * 4
        } else {
            start..start
        }
    }

    /// CRC-32 of each uncompressed chunk. Empty when checksums are off.
    pub fn decomp_checksums(&self) -> Range<usize> {
        let start = self.comp_checksums().end;
        if self.checksums {
            start..start + self.num_chunks * 4
        } else {
            start..start
        }
    }

    /// First byte of chunk data; everything before it is header.
    pub fn payload_start(&self) -> usize {
        self.decomp_checksums().end
    }
}

pub(crate) fn write_u64_table(out: &mut [u8], values: &[u64]) {
    for (dst, v) in out.chunks_exact_mut(8).zip(values) {
        dst.copy_from_slice(&v.to_le_bytes());
    }
}

pub(crate) fn write_u32_table(out: &mut [u8], values: &[u32]) {
    for (dst, v) in out.chunks_exact_mut(4).zip(values) {
        dst.copy_from_slice(&v.to_le_bytes());
    }
}

pub(crate) fn read_u64_table(data: &[u8]) -> Vec<u64> {
    data.chunks_exact(8)
        .map(|b| u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .collect()
}

pub(crate) fn read_u32_table(data: &[u8]) -> Vec<u32> {
    data.chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Encode a plain-old-data format header.
pub(crate) fn encode_format_header<H: Pod>(header: &H, out: &mut [u8]) {
    out[..std::mem::size_of::<H>()].copy_from_slice(bytemuck::bytes_of(header));
}

/// Decode a plain-old-data format header from exactly its encoded bytes.
pub(crate) fn decode_format_header<H: Pod>(data: &[u8]) -> Result<H> {
    if data.len() != std::mem::size_of::<H>() {
        return Err(BatchError::Header(format!(
            "format header is {} bytes, expected {}",
            data.len(),
            std::mem::size_of::<H>()
        )));
    }
    Ok(bytemuck::pod_read_unaligned(data))
}
