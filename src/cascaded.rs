//! Cascaded codec: run-length and delta passes over fixed-width elements,
//! optionally finished with frame-of-reference bit packing.
//!
//! Chunk encoding:
//!
//! ```text
//! [elements u32][tail_len u8][tail bytes]
//! [runs stream] x num_rles     (innermost pass last)
//! [values stream]
//! ```
//!
//! A stream is `[count u32][count x width bytes]`, or with bit packing
//! `[count u32][bits u8][base u64][ceil(count * bits / 8) bytes]`.
//! Bytes that do not fill a whole element are kept verbatim in the tail.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::codec::{Codec, DataType, Format};
use crate::{BatchError, ChunkStatus, Device, Result};

/// Upper bound on either kind of pass.
pub const MAX_PASSES: u8 = 8;

/// Chunk size the benchmark harness uses for cascaded runs unless told
/// otherwise.
pub const CASCADED_DEFAULT_CHUNK_SIZE: usize = 4096;

const COMP_BLOCKS_PER_UNIT: u32 = 4;
const DECOMP_BLOCKS_PER_UNIT: u32 = 4;
const CHUNK_PREFIX: usize = 4 + 1;
const RAW_STREAM_PREFIX: usize = 4;
const PACKED_STREAM_PREFIX: usize = 4 + 1 + 8;
const RUN_WIDTH: usize = 4;

type ChunkResult<T> = std::result::Result<T, ChunkStatus>;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CascadedFormatHeader {
    pub num_rles: u8,
    pub num_deltas: u8,
    pub use_bp: u8,
    pub data_type: u8,
}

/// Transform parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadedOptions {
    pub num_rles: u8,
    pub num_deltas: u8,
    pub use_bp: bool,
    pub data_type: DataType,
}

impl Default for CascadedOptions {
    fn default() -> Self {
        Self {
            num_rles: 2,
            num_deltas: 1,
            use_bp: true,
            data_type: DataType::Char,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cascaded {
    opts: CascadedOptions,
}

impl Default for Cascaded {
    fn default() -> Self {
        Self { opts: CascadedOptions::default() }
    }
}

impl Cascaded {
    pub fn new(opts: CascadedOptions) -> Result<Self> {
        if opts.num_rles > MAX_PASSES || opts.num_deltas > MAX_PASSES {
            return Err(BatchError::Config(format!(
                "cascaded supports at most {MAX_PASSES} passes of each kind, got {} RLE / {} delta",
                opts.num_rles, opts.num_deltas
            )));
        }
        Ok(Self { opts })
    }

    pub fn options(&self) -> CascadedOptions {
        self.opts
    }

    fn width(&self) -> usize {
        self.opts.data_type.width()
    }

    fn mask(&self) -> u64 {
        match self.width() {
            8 => u64::MAX,
            w => (1u64 << (w * 8)) - 1,
        }
    }

    fn stream_prefix(&self) -> usize {
        if self.opts.use_bp { PACKED_STREAM_PREFIX } else { RAW_STREAM_PREFIX }
    }

    fn write_stream(&self, out: &mut ByteWriter<'_>, values: &[u64], width: usize) -> ChunkResult<()> {
        out.put_u32(values.len() as u32)?;
        if !self.opts.use_bp {
            for v in values {
                out.put_slice(&v.to_le_bytes()[..width])?;
            }
            return Ok(());
        }
        let base = values.iter().copied().min().unwrap_or(0);
        let max = values.iter().copied().max().unwrap_or(0);
        let bits = 64 - (max - base).leading_zeros();
        out.put_u8(bits as u8)?;
        out.put_u64(base)?;
        let mut acc: u128 = 0;
        let mut filled = 0u32;
        for &v in values {
            acc |= ((v - base) as u128) << filled;
            filled += bits;
            while filled >= 8 {
                out.put_u8(acc as u8)?;
                acc >>= 8;
                filled -= 8;
            }
        }
        if filled > 0 {
            out.put_u8(acc as u8)?;
        }
        Ok(())
    }

    fn read_stream(&self, input: &mut ByteReader<'_>, width: usize, limit: usize) -> ChunkResult<Vec<u64>> {
        let count = input.u32()? as usize;
        if count > limit {
            return Err(ChunkStatus::CannotDecompress);
        }
        if !self.opts.use_bp {
            let data = input.take(count * width)?;
            return Ok(data.chunks_exact(width).map(read_le).collect());
        }
        let bits = input.u8()? as u32;
        if bits as usize > width * 8 {
            return Err(ChunkStatus::CannotDecompress);
        }
        let base = input.u64()?;
        let data = input.take((count * bits as usize).div_ceil(8))?;
        let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
        let mut bytes = data.iter();
        let mut acc: u128 = 0;
        let mut filled = 0u32;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            while filled < bits {
                let byte = *bytes.next().ok_or(ChunkStatus::CannotDecompress)?;
                acc |= (byte as u128) << filled;
                filled += 8;
            }
            out.push(base.wrapping_add(acc as u64 & mask));
            acc >>= bits;
            filled -= bits;
        }
        Ok(out)
    }
}

impl Codec for Cascaded {
    type FormatHeader = CascadedFormatHeader;

    const FORMAT: Format = Format::Cascaded;

    fn format_header(&self) -> CascadedFormatHeader {
        CascadedFormatHeader {
            num_rles: self.opts.num_rles,
            num_deltas: self.opts.num_deltas,
            use_bp: self.opts.use_bp as u8,
            data_type: self.opts.data_type.to_u8(),
        }
    }

    fn from_format_header(header: &CascadedFormatHeader) -> Result<Self> {
        if header.use_bp > 1 {
            return Err(BatchError::Header(format!("invalid bit-packing flag {}", header.use_bp)));
        }
        Self::new(CascadedOptions {
            num_rles: header.num_rles,
            num_deltas: header.num_deltas,
            use_bp: header.use_bp == 1,
            data_type: DataType::try_from(header.data_type)?,
        })
    }

    fn validate_chunk_size(&self, chunk_size: usize) -> Result<()> {
        if chunk_size == 0 || chunk_size > crate::codec::MAX_CHUNK_SIZE {
            return Err(BatchError::Config(format!(
                "cascaded does not support chunk size {chunk_size}"
            )));
        }
        if chunk_size % self.width() != 0 {
            return Err(BatchError::Config(format!(
                "chunk size {chunk_size} is not a multiple of the {} byte element width",
                self.width()
            )));
        }
        Ok(())
    }

    fn compute_max_compressed_chunk_size(&self, chunk_size: usize) -> usize {
        let w = self.width();
        let n = chunk_size / w;
        let rles = self.opts.num_rles as usize;
        CHUNK_PREFIX
            + (w - 1)
            + (rles + 1) * self.stream_prefix()
            + n * w
            + rles * n * RUN_WIDTH
    }

    fn compute_compression_occupancy(&self, device: &Device) -> u32 {
        device.occupancy(COMP_BLOCKS_PER_UNIT)
    }

    fn compute_decompression_occupancy(&self, device: &Device) -> u32 {
        device.occupancy(DECOMP_BLOCKS_PER_UNIT)
    }

    fn workspace_words(&self, chunk_size: usize) -> usize {
        chunk_size / self.width()
    }

    fn compress_chunk(
        &self,
        input: &[u8],
        output: &mut [u8],
        workspace: &mut [u64],
    ) -> ChunkResult<usize> {
        let w = self.width();
        let n = input.len() / w;
        let mut spill;
        let elems: &mut [u64] = match workspace.get_mut(..n) {
            Some(ws) => ws,
            None => {
                spill = vec![0u64; n];
                &mut spill
            }
        };
        for (e, bytes) in elems.iter_mut().zip(input.chunks_exact(w)) {
            *e = read_le(bytes);
        }

        let mut runs_streams = Vec::with_capacity(self.opts.num_rles as usize);
        let mut reduced = Vec::new();
        for pass in 0..self.opts.num_rles {
            let src: &[u64] = if pass == 0 { &*elems } else { &reduced };
            let (vals, runs) = run_length_encode(src);
            runs_streams.push(runs);
            reduced = vals;
        }
        let values: &mut [u64] = if self.opts.num_rles == 0 { elems } else { &mut reduced };
        for _ in 0..self.opts.num_deltas {
            delta_encode(values, self.mask());
        }

        let mut out = ByteWriter::new(output);
        out.put_u32(n as u32)?;
        let tail = &input[n * w..];
        out.put_u8(tail.len() as u8)?;
        out.put_slice(tail)?;
        for runs in &runs_streams {
            self.write_stream(&mut out, runs, RUN_WIDTH)?;
        }
        self.write_stream(&mut out, values, w)?;
        Ok(out.position())
    }

    fn decompress_chunk(
        &self,
        input: &[u8],
        output: &mut [u8],
        _workspace: &mut [u64],
    ) -> ChunkResult<usize> {
        let w = self.width();
        let mut r = ByteReader::new(input);
        let n = r.u32()? as usize;
        let tail_len = r.u8()? as usize;
        let expected = n.checked_mul(w).and_then(|b| b.checked_add(tail_len));
        if tail_len >= w || expected != Some(output.len()) {
            return Err(ChunkStatus::CannotDecompress);
        }
        let tail = r.take(tail_len)?;

        let mut runs_streams = Vec::with_capacity(self.opts.num_rles as usize);
        for _ in 0..self.opts.num_rles {
            runs_streams.push(self.read_stream(&mut r, RUN_WIDTH, n)?);
        }
        let mut values = self.read_stream(&mut r, w, n)?;
        if r.remaining() != 0 {
            return Err(ChunkStatus::CannotDecompress);
        }

        for _ in 0..self.opts.num_deltas {
            delta_decode(&mut values, self.mask());
        }
        for runs in runs_streams.iter().rev() {
            values = run_length_decode(&values, runs, n)?;
        }
        if values.len() != n {
            return Err(ChunkStatus::CannotDecompress);
        }

        let (body, rest) = output.split_at_mut(n * w);
        for (dst, v) in body.chunks_exact_mut(w).zip(&values) {
            dst.copy_from_slice(&v.to_le_bytes()[..w]);
        }
        rest.copy_from_slice(tail);
        Ok(output.len())
    }
}

fn read_le(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

fn run_length_encode(src: &[u64]) -> (Vec<u64>, Vec<u64>) {
    let mut vals: Vec<u64> = Vec::new();
    let mut runs: Vec<u64> = Vec::new();
    for &v in src {
        if let (Some(&last), Some(run)) = (vals.last(), runs.last_mut()) {
            if last == v {
                *run += 1;
                continue;
            }
        }
        vals.push(v);
        runs.push(1);
    }
    (vals, runs)
}

fn run_length_decode(vals: &[u64], runs: &[u64], limit: usize) -> ChunkResult<Vec<u64>> {
    if vals.len() != runs.len() {
        return Err(ChunkStatus::CannotDecompress);
    }
    let total = runs
        .iter()
        .try_fold(0u64, |acc, &r| acc.checked_add(r))
        .filter(|&t| t <= limit as u64)
        .ok_or(ChunkStatus::CannotDecompress)?;
    let mut out = Vec::with_capacity(total as usize);
    for (&v, &r) in vals.iter().zip(runs) {
        out.extend(std::iter::repeat(v).take(r as usize));
    }
    Ok(out)
}

fn delta_encode(values: &mut [u64], mask: u64) {
    for i in (1..values.len()).rev() {
        values[i] = values[i].wrapping_sub(values[i - 1]) & mask;
    }
}

fn delta_decode(values: &mut [u64], mask: u64) {
    for i in 1..values.len() {
        values[i] = values[i].wrapping_add(values[i - 1]) & mask;
    }
}

struct ByteWriter<'a> {
    out: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    fn new(out: &'a mut [u8]) -> Self {
        Self { out, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn put_slice(&mut self, bytes: &[u8]) -> ChunkResult<()> {
        let end = self.pos + bytes.len();
        self.out
            .get_mut(self.pos..end)
            .ok_or(ChunkStatus::OutputBufferTooSmall)?
            .copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    fn put_u8(&mut self, v: u8) -> ChunkResult<()> {
        self.put_slice(&[v])
    }

    fn put_u32(&mut self, v: u32) -> ChunkResult<()> {
        self.put_slice(&v.to_le_bytes())
    }

    fn put_u64(&mut self, v: u64) -> ChunkResult<()> {
        self.put_slice(&v.to_le_bytes())
    }
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> ChunkResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(ChunkStatus::CannotDecompress)?;
        let bytes = self.data.get(self.pos..end).ok_or(ChunkStatus::CannotDecompress)?;
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> ChunkResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> ChunkResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> ChunkResult<u64> {
        Ok(read_le(self.take(8)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(codec: &Cascaded, input: &[u8]) -> usize {
        let max = codec.compute_max_compressed_chunk_size(input.len().next_multiple_of(codec.width()));
        let mut out = vec![0u8; max];
        let mut ws = vec![0u64; codec.workspace_words(input.len())];
        let n = codec.compress_chunk(input, &mut out, &mut ws).unwrap();
        assert!(n <= max, "{n} > {max}");
        let mut back = vec![0u8; input.len()];
        assert_eq!(codec.decompress_chunk(&out[..n], &mut back, &mut ws), Ok(input.len()));
        assert_eq!(back, input);
        n
    }

    fn all_options() -> Vec<CascadedOptions> {
        let mut opts = Vec::new();
        for data_type in [DataType::Char, DataType::Short, DataType::Int, DataType::LongLong] {
            for (num_rles, num_deltas) in [(0, 0), (1, 0), (0, 1), (2, 1), (3, 3)] {
                for use_bp in [false, true] {
                    opts.push(CascadedOptions { num_rles, num_deltas, use_bp, data_type });
                }
            }
        }
        opts
    }

    #[test]
    fn sorted_ints_compress_well() {
        let codec = Cascaded::new(CascadedOptions {
            data_type: DataType::Int,
            ..CascadedOptions::default()
        })
        .unwrap();
        let input: Vec<u8> = (0u32..1024).flat_map(|v| (v / 4).to_le_bytes()).collect();
        let n = roundtrip(&codec, &input);
        assert!(n < input.len() / 4);
    }

    #[test]
    fn every_option_roundtrips_worst_case_data() {
        let noisy: Vec<u8> = (0..1003u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 11) as u8).collect();
        for opts in all_options() {
            let codec = Cascaded::new(opts).unwrap();
            roundtrip(&codec, &noisy);
            roundtrip(&codec, &[7u8; 64]);
            roundtrip(&codec, &noisy[..3]);
        }
    }

    #[test]
    fn rejects_misaligned_chunk_size() {
        let codec = Cascaded::new(CascadedOptions {
            data_type: DataType::Int,
            ..CascadedOptions::default()
        })
        .unwrap();
        assert!(codec.validate_chunk_size(4096).is_ok());
        assert!(codec.validate_chunk_size(4094).is_err());
    }

    #[test]
    fn rejects_too_many_passes() {
        let opts = CascadedOptions { num_rles: MAX_PASSES + 1, ..CascadedOptions::default() };
        assert!(Cascaded::new(opts).is_err());
    }

    #[test]
    fn truncated_chunk_reports_status() {
        let codec = Cascaded::default();
        let input = b"aaaaabbbbbcccccdddddeeeee".to_vec();
        let mut out = vec![0u8; codec.compute_max_compressed_chunk_size(input.len())];
        let n = codec.compress_chunk(&input, &mut out, &mut []).unwrap();
        let mut back = vec![0u8; input.len()];
        for cut in 0..n {
            assert_eq!(
                codec.decompress_chunk(&out[..cut], &mut back, &mut []),
                Err(ChunkStatus::CannotDecompress)
            );
        }
    }

    #[test]
    fn oversized_runs_are_rejected() {
        assert!(run_length_decode(&[1, 2], &[3, u64::MAX], 100).is_err());
        assert!(run_length_decode(&[1], &[101], 100).is_err());
        assert_eq!(run_length_decode(&[1, 2], &[2, 1], 100).unwrap(), vec![1, 1, 2]);
    }
}
