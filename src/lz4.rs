//! LZ4 block codec. The element data type is recorded in the format header
//! so a stream can be reopened with the parameters it was written with.

use bytemuck::{Pod, Zeroable};

use crate::codec::{Codec, DataType, Format};
use crate::{ChunkStatus, Device, Result};

const COMP_BLOCKS_PER_UNIT: u32 = 2;
const DECOMP_BLOCKS_PER_UNIT: u32 = 4;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Lz4FormatHeader {
    pub data_type: u8,
    pub reserved: [u8; 3],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lz4 {
    data_type: DataType,
}

impl Lz4 {
    pub fn new(data_type: DataType) -> Self {
        Self { data_type }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }
}

impl Codec for Lz4 {
    type FormatHeader = Lz4FormatHeader;

    const FORMAT: Format = Format::Lz4;

    fn format_header(&self) -> Lz4FormatHeader {
        Lz4FormatHeader {
            data_type: self.data_type.to_u8(),
            reserved: [0; 3],
        }
    }

    fn from_format_header(header: &Lz4FormatHeader) -> Result<Self> {
        Ok(Self::new(DataType::try_from(header.data_type)?))
    }

    fn compute_max_compressed_chunk_size(&self, chunk_size: usize) -> usize {
        lz4_flex::block::get_maximum_output_size(chunk_size)
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
        lz4_flex::block::compress_into(input, output).map_err(|_| ChunkStatus::OutputBufferTooSmall)
    }

    fn decompress_chunk(
        &self,
        input: &[u8],
        output: &mut [u8],
        _workspace: &mut [u64],
    ) -> std::result::Result<usize, ChunkStatus> {
        lz4_flex::block::decompress_into(input, output).map_err(|_| ChunkStatus::CannotDecompress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let codec = Lz4::new(DataType::Int);
        let back = Lz4::from_format_header(&codec.format_header()).unwrap();
        assert_eq!(back, codec);
    }

    #[test]
    fn unknown_data_type_rejected() {
        let header = Lz4FormatHeader { data_type: 9, reserved: [0; 3] };
        assert!(Lz4::from_format_header(&header).is_err());
    }

    #[test]
    fn repetitive_chunk_roundtrip() {
        let input = b"abcabcabcabcabcabcabcabcabcabcabcabc".repeat(8);
        let codec = Lz4::default();
        let mut out = vec![0u8; codec.compute_max_compressed_chunk_size(input.len())];
        let n = codec.compress_chunk(&input, &mut out, &mut []).unwrap();
        assert!(n < input.len());
        let mut back = vec![0u8; input.len()];
        assert_eq!(codec.decompress_chunk(&out[..n], &mut back, &mut []), Ok(input.len()));
        assert_eq!(back, input);
    }
}
