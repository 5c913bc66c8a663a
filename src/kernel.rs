//! Batched chunk kernels shared by every codec.
//!
//! One call covers the whole batch. Chunks are spread over the calling
//! worker pool; each worker borrows its own scratch slot for the codec's
//! working memory. Compression writes every chunk into a worst-case sized
//! slot first and packs the results afterwards, so offsets follow chunk
//! order regardless of which worker finished first.

use rayon::prelude::*;

use crate::checksum::crc32;
use crate::chunking::ChunkMap;
use crate::codec::Codec;
use crate::header::CommonHeader;
use crate::{ChunkStatus, Device, DeviceBuffer, Result};

/// Device working memory: one slot per concurrent worker.
#[derive(Debug)]
pub struct Scratch {
    slots: Vec<DeviceBuffer<u64>>,
    words_per_slot: usize,
}

impl Scratch {
    pub fn new(device: &Device, workers: u32, words_per_slot: usize) -> Result<Self> {
        let slots = (0..workers.max(1))
            .map(|_| device.alloc::<u64>(words_per_slot))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { slots, words_per_slot })
    }

    pub fn words_per_slot(&self) -> usize {
        self.words_per_slot
    }

    pub fn size_bytes(&self) -> u64 {
        self.slots.iter().map(DeviceBuffer::size_bytes).sum()
    }

    fn with_slot<R>(&self, f: impl FnOnce(&mut [u64]) -> R) -> R {
        let worker = rayon::current_thread_index().unwrap_or(0) % self.slots.len();
        let mut guard = self.slots[worker].write_scratch();
        f(&mut guard[..])
    }
}

/// Arguments of one batched compression.
pub struct CompressBatch<'a> {
    /// Receives the total compressed size.
    pub header: &'a mut CommonHeader,
    pub input: &'a [u8],
    /// Chunk data region of the output; must hold `num_chunks` worst-case slots.
    pub output: &'a mut [u8],
    /// Absolute stream position of `output[0]`.
    pub payload_start: usize,
    pub scratch: &'a Scratch,
    pub chunks: ChunkMap,
    pub max_comp_chunk_size: usize,
    pub offsets: &'a mut [u64],
    pub sizes: &'a mut [u64],
    /// Filled only when non-empty.
    pub comp_checksums: &'a mut [u32],
    /// Filled only when non-empty.
    pub decomp_checksums: &'a mut [u32],
    pub statuses: &'a mut [ChunkStatus],
}

/// Arguments of one batched decompression.
pub struct DecompressBatch<'a> {
    /// The compressed stream, bounded to its total compressed size.
    pub input: &'a [u8],
    pub output: &'a mut [u8],
    pub scratch: &'a Scratch,
    pub chunks: ChunkMap,
    /// Smallest valid chunk offset.
    pub payload_start: usize,
    pub offsets: &'a [u64],
    pub sizes: &'a [u64],
    /// Verification is skipped when these are empty.
    pub comp_checksums: &'a [u32],
    pub decomp_checksums: &'a [u32],
    pub statuses: &'a mut [ChunkStatus],
}

pub fn batch_compress<C: Codec>(codec: &C, batch: CompressBatch<'_>) {
    let CompressBatch {
        header,
        input,
        output,
        payload_start,
        scratch,
        chunks,
        max_comp_chunk_size: max,
        offsets,
        sizes,
        comp_checksums,
        decomp_checksums,
        statuses,
    } = batch;
    let n = chunks.chunk_count();
    let input = &input[..chunks.input_size()];

    if n > 0 {
        output[..n * max]
            .par_chunks_mut(max)
            .zip(input.par_chunks(chunks.chunk_size()))
            .zip(sizes.par_iter_mut())
            .zip(statuses.par_iter_mut())
            .for_each(|(((slot, chunk), size), status)| {
                let result = scratch.with_slot(|ws| codec.compress_chunk(chunk, slot, ws));
                (*size, *status) = match result {
                    Ok(written) if written <= max => (written as u64, ChunkStatus::Success),
                    Ok(_) => (0, ChunkStatus::OutputBufferTooSmall),
                    Err(failure) => (0, failure),
                };
            });
    }

    if !comp_checksums.is_empty() {
        let slots = &output[..n * max];
        let sizes = &*sizes;
        comp_checksums
            .par_iter_mut()
            .zip(decomp_checksums.par_iter_mut())
            .enumerate()
            .for_each(|(i, (comp, decomp))| {
                let start = i * max;
                *comp = crc32(&slots[start..start + sizes[i] as usize]);
                *decomp = crc32(&input[chunks.chunk_range(i).unwrap_or(0..0)]);
            });
    }

    // Pack the slots front to back; a chunk never moves past its own slot.
    let mut cursor = 0usize;
    for i in 0..n {
        let len = sizes[i] as usize;
        output.copy_within(i * max..i * max + len, cursor);
        offsets[i] = (payload_start + cursor) as u64;
        cursor += len;
    }
    header.compressed_total_size = (payload_start + cursor) as u64;
}

pub fn batch_decompress<C: Codec>(codec: &C, batch: DecompressBatch<'_>) {
    let DecompressBatch {
        input,
        output,
        scratch,
        chunks,
        payload_start,
        offsets,
        sizes,
        comp_checksums,
        decomp_checksums,
        statuses,
    } = batch;
    let n = chunks.chunk_count();
    let mut slots: Vec<&mut [u8]> = output.chunks_mut(chunks.chunk_size()).take(n).collect();
    slots.resize_with(n, Default::default);
    let verify = !comp_checksums.is_empty();

    slots
        .into_par_iter()
        .zip(statuses[..n].par_iter_mut())
        .enumerate()
        .for_each(|(i, (slot, status))| {
            let expected = chunks.chunk_len(i);
            if slot.len() < expected {
                *status = ChunkStatus::OutputBufferTooSmall;
                return;
            }
            let Some(comp) = chunk_bytes(input, payload_start, offsets[i], sizes[i]) else {
                *status = ChunkStatus::CannotDecompress;
                return;
            };
            if verify && crc32(comp) != comp_checksums[i] {
                *status = ChunkStatus::ChecksumMismatch;
                return;
            }
            let dst = &mut slot[..expected];
            *status = match scratch.with_slot(|ws| codec.decompress_chunk(comp, &mut *dst, ws)) {
                Ok(written) if written == expected => ChunkStatus::Success,
                Ok(_) => ChunkStatus::CannotDecompress,
                Err(failure) => failure,
            };
            if verify && status.is_success() && crc32(dst) != decomp_checksums[i] {
                *status = ChunkStatus::ChecksumMismatch;
            }
        });
}

/// Bounds-checked view of one chunk's compressed bytes.
fn chunk_bytes(input: &[u8], payload_start: usize, offset: u64, size: u64) -> Option<&[u8]> {
    let start = usize::try_from(offset).ok()?;
    let len = usize::try_from(size).ok()?;
    if start < payload_start || len == 0 {
        return None;
    }
    input.get(start..start.checked_add(len)?)
}
