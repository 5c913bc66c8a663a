//! The batch manager: chunking, buffer sizing, stream layout and dispatch,
//! shared by every codec.
//!
//! `compress` and `decompress` validate what they can on the host, then
//! enqueue one job on the manager's [`Stream`] and return. Results, status
//! arrays and header fields written by a job are only meaningful after
//! [`Stream::synchronize`].

use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, warn};

use crate::chunking::ChunkMap;
use crate::codec::{Codec, Format};
use crate::header::{
    decode_format_header, encode_format_header, read_u32_table, read_u64_table, write_u32_table,
    write_u64_table, CommonHeader, StreamLayout,
};
use crate::kernel::{CompressBatch, DecompressBatch, Scratch};
use crate::{BatchConfig, BatchError, ChecksumMode, ChunkStatus, Device, DeviceBuffer, Result, Stream};

/// What a compressed stream needs from the caller before it can be
/// decompressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecompressionConfig {
    /// Bytes the output buffer must hold.
    pub decomp_data_size: usize,
    /// Entries the status buffer must hold.
    pub num_chunks: usize,
    pub chunk_size: usize,
    pub checksum_mode: ChecksumMode,
}

/// Codec-independent view of a manager.
pub trait ManagerBase: Send {
    fn format(&self) -> Format;

    fn config(&self) -> &BatchConfig;

    fn stream(&self) -> &Stream;

    fn max_compressed_chunk_size(&self) -> usize;

    /// Chunks an input of `input_size` bytes is split into.
    fn num_chunks(&self, input_size: usize) -> usize {
        ChunkMap::new(input_size, self.config().chunk_size).chunk_count()
    }

    /// Bytes the caller must allocate for the compressed output of an input
    /// of `input_size` bytes.
    fn get_compressed_output_size(&self, input_size: usize) -> usize {
        let n = self.num_chunks(input_size);
        let layout = StreamLayout {
            format_header_size: self.format_header_bytes().len(),
            num_chunks: n,
            checksums: self.config().checksum_mode.computes(),
        };
        layout.payload_start() + n * self.max_compressed_chunk_size()
    }

    /// Device working memory held by the manager.
    fn scratch_size(&self) -> u64;

    /// Encoded format header as written into every stream.
    fn format_header_bytes(&self) -> Vec<u8>;

    /// Enqueue compression of the first `input_size` bytes of `input`.
    ///
    /// `output` must hold [`get_compressed_output_size`] bytes and
    /// `statuses` one entry per chunk.
    ///
    /// [`get_compressed_output_size`]: ManagerBase::get_compressed_output_size
    fn compress(
        &mut self,
        input: &DeviceBuffer<u8>,
        input_size: usize,
        output: &DeviceBuffer<u8>,
        statuses: &DeviceBuffer<ChunkStatus>,
    ) -> Result<()>;

    /// Read the header of a compressed stream on the host. `compressed`
    /// must not have work pending on it.
    fn configure_decompression(&self, compressed: &DeviceBuffer<u8>) -> Result<DecompressionConfig>;

    /// Enqueue decompression of the stream in `input`.
    fn decompress(
        &mut self,
        input: &DeviceBuffer<u8>,
        output: &DeviceBuffer<u8>,
        statuses: &DeviceBuffer<ChunkStatus>,
    ) -> Result<()>;

    /// Total size of a compressed stream, read from its header. Call after
    /// synchronizing the compression that produced it.
    fn get_compressed_size(&self, compressed: &DeviceBuffer<u8>) -> Result<usize> {
        let header = read_common_header(compressed)?;
        Ok(header.compressed_total_size as usize)
    }
}

/// Orchestrates batched compression for one codec.
pub struct BatchManager<C: Codec> {
    codec: Arc<C>,
    config: BatchConfig,
    format_header: Box<C::FormatHeader>,
    stream: Stream,
    max_comp_chunk_size: usize,
    comp_occupancy: u32,
    decomp_occupancy: u32,
    comp_pool: Arc<ThreadPool>,
    decomp_pool: Arc<ThreadPool>,
    scratch: Arc<Scratch>,
}

impl<C: Codec> std::fmt::Debug for BatchManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchManager")
            .field("config", &self.config)
            .field("format_header", &self.format_header)
            .finish_non_exhaustive()
    }
}

impl<C: Codec> BatchManager<C> {
    /// Configure a manager for `codec` issuing work on `stream`.
    pub fn new(codec: C, config: &BatchConfig, stream: &Stream) -> Result<Self> {
        let device = stream.device();
        if config.device_id != device.id() {
            return Err(BatchError::Config(format!(
                "configured for device {} but stream belongs to device {}",
                config.device_id,
                device.id()
            )));
        }
        codec.validate_chunk_size(config.chunk_size)?;
        let max_comp_chunk_size = codec.compute_max_compressed_chunk_size(config.chunk_size);
        if max_comp_chunk_size == 0 {
            return Err(BatchError::Config(format!(
                "{} reported a zero compressed size bound",
                C::FORMAT
            )));
        }

        let comp_occupancy = codec.compute_compression_occupancy(device).max(1);
        let decomp_occupancy = codec.compute_decompression_occupancy(device).max(1);
        let comp_pool = build_pool(C::FORMAT, "comp", comp_occupancy)?;
        let decomp_pool = build_pool(C::FORMAT, "decomp", decomp_occupancy)?;
        let scratch = Scratch::new(
            device,
            comp_occupancy.max(decomp_occupancy),
            codec.workspace_words(config.chunk_size),
        )?;

        info!(
            format = %C::FORMAT,
            chunk_size = config.chunk_size,
            max_comp_chunk_size,
            comp_occupancy,
            decomp_occupancy,
            scratch_bytes = scratch.size_bytes(),
            "configured batch manager"
        );
        Ok(Self {
            format_header: Box::new(codec.format_header()),
            codec: Arc::new(codec),
            config: config.clone(),
            stream: stream.clone(),
            max_comp_chunk_size,
            comp_occupancy,
            decomp_occupancy,
            comp_pool: Arc::new(comp_pool),
            decomp_pool: Arc::new(decomp_pool),
            scratch: Arc::new(scratch),
        })
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Parameter block written after the common header of every stream.
    pub fn get_format_header(&self) -> &C::FormatHeader {
        &self.format_header
    }

    pub fn compression_occupancy(&self) -> u32 {
        self.comp_occupancy
    }

    pub fn decompression_occupancy(&self) -> u32 {
        self.decomp_occupancy
    }
}

impl<C: Codec> ManagerBase for BatchManager<C> {
    fn format(&self) -> Format {
        C::FORMAT
    }

    fn config(&self) -> &BatchConfig {
        &self.config
    }

    fn stream(&self) -> &Stream {
        &self.stream
    }

    fn max_compressed_chunk_size(&self) -> usize {
        self.max_comp_chunk_size
    }

    fn scratch_size(&self) -> u64 {
        self.scratch.size_bytes()
    }

    fn format_header_bytes(&self) -> Vec<u8> {
        bytemuck::bytes_of(&*self.format_header).to_vec()
    }

    fn compress(
        &mut self,
        input: &DeviceBuffer<u8>,
        input_size: usize,
        output: &DeviceBuffer<u8>,
        statuses: &DeviceBuffer<ChunkStatus>,
    ) -> Result<()> {
        if input_size > input.len() {
            return Err(BatchError::BufferTooSmall {
                what: "input",
                needed: input_size,
                actual: input.len(),
            });
        }
        let chunks = ChunkMap::new(input_size, self.config.chunk_size);
        let n = chunks.chunk_count();
        if u32::try_from(n).is_err() {
            return Err(BatchError::InvalidArgument(format!("{n} chunks exceed the header limit")));
        }
        let required = self.get_compressed_output_size(input_size);
        if output.len() < required {
            return Err(BatchError::BufferTooSmall {
                what: "output",
                needed: required,
                actual: output.len(),
            });
        }
        if statuses.len() < n {
            return Err(BatchError::BufferTooSmall {
                what: "status",
                needed: n,
                actual: statuses.len(),
            });
        }
        if input.same_allocation(output) {
            return Err(BatchError::InvalidArgument(
                "compression input and output must be distinct buffers".into(),
            ));
        }

        let job = CompressJob {
            codec: self.codec.clone(),
            format_header: *self.format_header,
            checksum_mode: self.config.checksum_mode,
            chunks,
            max_comp_chunk_size: self.max_comp_chunk_size,
            pool: self.comp_pool.clone(),
            scratch: self.scratch.clone(),
            input: input.clone(),
            output: output.clone(),
            statuses: statuses.clone(),
        };
        debug!(format = %C::FORMAT, input_size, chunks = n, "enqueue compress");
        self.stream.enqueue("compress", move || job.run())
    }

    fn configure_decompression(&self, compressed: &DeviceBuffer<u8>) -> Result<DecompressionConfig> {
        let header = read_common_header(compressed)?;
        check_stream::<C>(&header)?;
        check_complete(&header, compressed.len())?;
        Ok(DecompressionConfig {
            decomp_data_size: header.uncompressed_total_size as usize,
            num_chunks: header.num_chunks as usize,
            chunk_size: header.uncompressed_chunk_size as usize,
            checksum_mode: header.checksum_mode()?,
        })
    }

    fn decompress(
        &mut self,
        input: &DeviceBuffer<u8>,
        output: &DeviceBuffer<u8>,
        statuses: &DeviceBuffer<ChunkStatus>,
    ) -> Result<()> {
        if input.same_allocation(output) {
            return Err(BatchError::InvalidArgument(
                "decompression input and output must be distinct buffers".into(),
            ));
        }
        let job = DecompressJob {
            device: self.stream.device().clone(),
            checksum_mode: self.config.checksum_mode,
            configured_chunk_size: self.config.chunk_size,
            occupancy: self.decomp_occupancy,
            pool: self.decomp_pool.clone(),
            scratch: self.scratch.clone(),
            input: input.clone(),
            output: output.clone(),
            statuses: statuses.clone(),
            _codec: std::marker::PhantomData::<C>,
        };
        debug!(format = %C::FORMAT, "enqueue decompress");
        self.stream.enqueue("decompress", move || job.run())
    }
}

fn build_pool(format: Format, kind: &str, threads: u32) -> Result<ThreadPool> {
    let prefix = format!("chunkbatch-{format}-{kind}");
    ThreadPoolBuilder::new()
        .num_threads(threads as usize)
        .thread_name(move |i| format!("{prefix}-{i}"))
        .build()
        .map_err(|e| BatchError::Device(format!("failed to start {kind} workers: {e}")))
}

fn read_common_header(compressed: &DeviceBuffer<u8>) -> Result<CommonHeader> {
    let data = compressed.read()?;
    CommonHeader::parse(&data)
}

/// Length of the stream the header describes, which must fit in `available`
/// bytes. Checked before any output is sized from the header.
fn check_complete(header: &CommonHeader, available: usize) -> Result<usize> {
    let total = header.compressed_total_size as usize;
    if available < total {
        return Err(BatchError::Header(format!(
            "stream truncated: header declares {total} bytes, buffer holds {available}"
        )));
    }
    Ok(total)
}

fn check_stream<C: Codec>(header: &CommonHeader) -> Result<()> {
    let format = header.format()?;
    if format != C::FORMAT {
        return Err(BatchError::Header(format!(
            "stream was written by {format}, manager is {}",
            C::FORMAT
        )));
    }
    let expected = std::mem::size_of::<C::FormatHeader>();
    if header.format_header_size as usize != expected {
        return Err(BatchError::Header(format!(
            "{format} format header is {expected} bytes, stream declares {}",
            header.format_header_size
        )));
    }
    Ok(())
}

struct CompressJob<C: Codec> {
    codec: Arc<C>,
    format_header: C::FormatHeader,
    checksum_mode: ChecksumMode,
    chunks: ChunkMap,
    max_comp_chunk_size: usize,
    pool: Arc<ThreadPool>,
    scratch: Arc<Scratch>,
    input: DeviceBuffer<u8>,
    output: DeviceBuffer<u8>,
    statuses: DeviceBuffer<ChunkStatus>,
}

impl<C: Codec> CompressJob<C> {
    fn run(self) -> Result<()> {
        let input = self.input.read()?;
        let mut output = self.output.write()?;
        let mut statuses = self.statuses.write()?;

        let n = self.chunks.chunk_count();
        let mut header = CommonHeader::new(
            C::FORMAT,
            self.checksum_mode,
            std::mem::size_of::<C::FormatHeader>(),
            &self.chunks,
        );
        let layout = header.layout();
        let payload_start = layout.payload_start();
        let mut offsets = vec![0u64; n];
        let mut sizes = vec![0u64; n];
        let (mut comp_checksums, mut decomp_checksums) = if self.checksum_mode.computes() {
            (vec![0u32; n], vec![0u32; n])
        } else {
            (Vec::new(), Vec::new())
        };

        let (head, payload) = output.split_at_mut(payload_start);
        let input: &[u8] = &input;
        let statuses = &mut statuses[..n];
        let codec = &*self.codec;
        self.pool.install(|| {
            codec.do_batch_compress(CompressBatch {
                header: &mut header,
                input,
                output: payload,
                payload_start,
                scratch: &self.scratch,
                chunks: self.chunks,
                max_comp_chunk_size: self.max_comp_chunk_size,
                offsets: &mut offsets,
                sizes: &mut sizes,
                comp_checksums: &mut comp_checksums,
                decomp_checksums: &mut decomp_checksums,
                statuses,
            })
        });

        header.write_to(head);
        encode_format_header(&self.format_header, &mut head[layout.format_header()]);
        write_u64_table(&mut head[layout.offsets()], &offsets);
        write_u64_table(&mut head[layout.sizes()], &sizes);
        write_u32_table(&mut head[layout.comp_checksums()], &comp_checksums);
        write_u32_table(&mut head[layout.decomp_checksums()], &decomp_checksums);
        debug!(
            format = %C::FORMAT,
            chunks = n,
            compressed = header.compressed_total_size,
            "compress finished"
        );
        Ok(())
    }
}

struct DecompressJob<C: Codec> {
    device: Device,
    checksum_mode: ChecksumMode,
    configured_chunk_size: usize,
    occupancy: u32,
    pool: Arc<ThreadPool>,
    scratch: Arc<Scratch>,
    input: DeviceBuffer<u8>,
    output: DeviceBuffer<u8>,
    statuses: DeviceBuffer<ChunkStatus>,
    _codec: std::marker::PhantomData<C>,
}

impl<C: Codec> DecompressJob<C> {
    fn run(self) -> Result<()> {
        let input = self.input.read()?;
        let header = CommonHeader::parse(&input)?;
        check_stream::<C>(&header)?;
        let total = check_complete(&header, input.len())?;
        let input = &input[..total];
        let layout = header.layout();
        let format_header: C::FormatHeader = decode_format_header(&input[layout.format_header()])?;
        let codec = C::from_format_header(&format_header)?;
        let chunks = header.chunk_map();
        codec
            .validate_chunk_size(chunks.chunk_size())
            .map_err(|e| BatchError::Header(e.to_string()))?;
        let n = chunks.chunk_count();

        let offsets = read_u64_table(&input[layout.offsets()]);
        let sizes = read_u64_table(&input[layout.sizes()]);
        let verify = self.checksum_mode.verifies() && layout.checksums;
        if self.checksum_mode.verifies() && !layout.checksums {
            warn!(format = %C::FORMAT, "stream carries no checksums, skipping verification");
        }
        let (comp_checksums, decomp_checksums) = if verify {
            (
                read_u32_table(&input[layout.comp_checksums()]),
                read_u32_table(&input[layout.decomp_checksums()]),
            )
        } else {
            (Vec::new(), Vec::new())
        };

        let mut statuses = self.statuses.write()?;
        if statuses.len() < n {
            return Err(BatchError::BufferTooSmall {
                what: "status",
                needed: n,
                actual: statuses.len(),
            });
        }
        let mut output = self.output.write()?;
        let output: &mut [u8] = &mut output;
        let statuses = &mut statuses[..n];

        let words = codec.workspace_words(chunks.chunk_size());
        let call_scratch;
        let scratch = if words > self.scratch.words_per_slot() {
            debug!(
                stream_chunk_size = chunks.chunk_size(),
                configured_chunk_size = self.configured_chunk_size,
                "allocating call scratch for larger stream chunks"
            );
            call_scratch = Scratch::new(&self.device, self.occupancy, words)?;
            &call_scratch
        } else {
            &*self.scratch
        };

        self.pool.install(|| {
            codec.do_batch_decompress(DecompressBatch {
                input,
                output,
                scratch,
                chunks,
                payload_start: layout.payload_start(),
                offsets: &offsets,
                sizes: &sizes,
                comp_checksums: &comp_checksums,
                decomp_checksums: &decomp_checksums,
                statuses,
            })
        });
        debug!(format = %C::FORMAT, chunks = n, verify, "decompress finished");
        Ok(())
    }
}

/// Host copy of a finished batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBatch {
    pub data: Vec<u8>,
    pub statuses: Vec<ChunkStatus>,
}

impl HostBatch {
    pub fn failures(&self) -> usize {
        crate::status::count_failures(&self.statuses)
    }
}

/// Compress host bytes through `manager` and wait for the result.
pub fn compress_bytes(manager: &mut dyn ManagerBase, data: &[u8]) -> Result<HostBatch> {
    let device = manager.stream().device().clone();
    let input = device.alloc_from(data)?;
    let output = device.alloc::<u8>(manager.get_compressed_output_size(data.len()))?;
    let statuses = device.alloc::<ChunkStatus>(manager.num_chunks(data.len()))?;
    manager.compress(&input, data.len(), &output, &statuses)?;
    manager.stream().synchronize()?;
    let size = manager.get_compressed_size(&output)?;
    Ok(HostBatch {
        data: output.to_vec_prefix(size)?,
        statuses: statuses.to_vec()?,
    })
}

/// Decompress a host copy of a stream through `manager` and wait for the
/// result.
pub fn decompress_bytes(manager: &mut dyn ManagerBase, compressed: &[u8]) -> Result<HostBatch> {
    let device = manager.stream().device().clone();
    let input = device.alloc_from(compressed)?;
    let cfg = manager.configure_decompression(&input)?;
    let output = device.alloc::<u8>(cfg.decomp_data_size)?;
    let statuses = device.alloc::<ChunkStatus>(cfg.num_chunks)?;
    manager.decompress(&input, &output, &statuses)?;
    manager.stream().synchronize()?;
    Ok(HostBatch {
        data: output.to_vec()?,
        statuses: statuses.to_vec()?,
    })
}
