//! Snappy codec: fixed format, no parameters.

use bytemuck::{Pod, Zeroable};

use crate::codec::{Codec, Format};
use crate::{ChunkStatus, Device, Result};

const COMP_BLOCKS_PER_UNIT: u32 = 2;
const DECOMP_BLOCKS_PER_UNIT: u32 = 4;

/// Snappy carries no parameters; its format header is empty.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnappyFormatHeader {}

// SAFETY: zero-sized, `repr(C)`, no fields.
unsafe impl Zeroable for SnappyFormatHeader {}
// SAFETY: as above; every (empty) bit pattern is valid.
unsafe impl Pod for SnappyFormatHeader {}

#[derive(Debug, Clone, Copy, Default)]
pub struct Snappy;

impl Codec for Snappy {
    type FormatHeader = SnappyFormatHeader;

    const FORMAT: Format = Format::Snappy;

    fn format_header(&self) -> SnappyFormatHeader {
        SnappyFormatHeader {}
    }

    fn from_format_header(_header: &SnappyFormatHeader) -> Result<Self> {
        Ok(Snappy)
    }

    fn compute_max_compressed_chunk_size(&self, chunk_size: usize) -> usize {
        snap::raw::max_compress_len(chunk_size)
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
        snap::raw::Encoder::new()
            .compress(input, output)
            .map_err(|_| ChunkStatus::OutputBufferTooSmall)
    }

    fn decompress_chunk(
        &self,
        input: &[u8],
        output: &mut [u8],
        _workspace: &mut [u64],
    ) -> std::result::Result<usize, ChunkStatus> {
        let len = snap::raw::decompress_len(input).map_err(|_| ChunkStatus::CannotDecompress)?;
        if len != output.len() {
            return Err(ChunkStatus::CannotDecompress);
        }
        snap::raw::Decoder::new()
            .decompress(input, output)
            .map_err(|_| ChunkStatus::CannotDecompress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_format_header() {
        assert_eq!(std::mem::size_of::<SnappyFormatHeader>(), 0);
        assert!(bytemuck::bytes_of(&Snappy.format_header()).is_empty());
    }

    #[test]
    fn incompressible_chunk_fits_bound() {
        let input: Vec<u8> = (0..4096u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8).collect();
        let max = Snappy.compute_max_compressed_chunk_size(input.len());
        let mut out = vec![0u8; max];
        let n = Snappy.compress_chunk(&input, &mut out, &mut []).unwrap();
        assert!(n <= max);
        let mut back = vec![0u8; input.len()];
        assert_eq!(Snappy.decompress_chunk(&out[..n], &mut back, &mut []), Ok(input.len()));
        assert_eq!(back, input);
    }

    #[test]
    fn garbage_is_reported() {
        let mut out = vec![0u8; 16];
        assert_eq!(
            Snappy.decompress_chunk(&[0xFF, 0xFF, 0xFF], &mut out, &mut []),
            Err(ChunkStatus::CannotDecompress)
        );
    }
}
