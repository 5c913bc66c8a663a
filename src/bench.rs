//! Compression benchmark driver used by `benchmark_hlif`.
//!
//! Buffers are allocated once; every iteration compresses the whole dataset
//! in one batch, synchronizes, decompresses it again and synchronizes. Any
//! failed chunk or mismatching output aborts the run.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::codec::{DataType, Format};
use crate::status::count_failures;
use crate::{BatchError, ChunkStatus, DeviceBuffer, ManagerBase, Result};

/// Read a binary dataset, dropping trailing bytes that do not form a whole
/// element of `data_type`.
pub fn load_dataset_from_binary<P: AsRef<Path>>(path: P, data_type: DataType) -> Result<Vec<u8>> {
    let mut data = std::fs::read(path)?;
    let whole = data.len() - data.len() % data_type.width();
    data.truncate(whole);
    Ok(data)
}

/// Timings of one compress/decompress cycle.
#[derive(Debug, Clone, Serialize)]
pub struct IterationRow {
    pub iteration: usize,
    pub compressed_bytes: usize,
    pub compress_ms: f64,
    pub decompress_ms: f64,
    pub compress_gbps: f64,
    pub decompress_gbps: f64,
}

/// Device memory held during a run.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryReport {
    pub input_bytes: u64,
    pub compressed_buffer_bytes: u64,
    pub decompressed_buffer_bytes: u64,
    pub status_bytes: u64,
    pub scratch_bytes: u64,
}

impl MemoryReport {
    pub fn compression_total(&self) -> u64 {
        self.input_bytes + self.compressed_buffer_bytes + self.status_bytes + self.scratch_bytes
    }

    pub fn decompression_total(&self) -> u64 {
        self.compressed_buffer_bytes + self.decompressed_buffer_bytes + self.status_bytes + self.scratch_bytes
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub format: Format,
    pub chunk_size: usize,
    pub num_chunks: usize,
    pub uncompressed_bytes: usize,
    pub compressed_bytes: usize,
    pub compression_ratio: f64,
    /// Mean over all iterations.
    pub compress_gbps: f64,
    pub decompress_gbps: f64,
    pub memory: Option<MemoryReport>,
    pub iterations: Vec<IterationRow>,
}

impl BenchReport {
    /// Human readable summary on stdout.
    pub fn print_summary(&self) {
        println!("----------");
        println!("files: 1");
        println!("format: {}", self.format);
        println!("chunk size (B): {}", self.chunk_size);
        println!("uncompressed (B): {}", self.uncompressed_bytes);
        println!("comp_size: {}, compressed ratio: {:.4}", self.compressed_bytes, self.compression_ratio);
        if let Some(mem) = &self.memory {
            println!(
                "compression memory (input+output+temp) (B): {}",
                mem.compression_total()
            );
            println!("compression temp space (B): {}", mem.scratch_bytes);
            println!(
                "decompression memory (input+output+temp) (B): {}",
                mem.decompression_total()
            );
        }
        println!("compression throughput (GB/s): {:.4}", self.compress_gbps);
        println!("decompression throughput (GB/s): {:.4}", self.decompress_gbps);
    }
}

fn gbps(bytes: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 { 0.0 } else { bytes as f64 / 1e9 / secs }
}

fn check_statuses(operation: &'static str, statuses: &DeviceBuffer<ChunkStatus>) -> Result<()> {
    let statuses = statuses.to_vec()?;
    let failed = count_failures(&statuses);
    if failed > 0 {
        return Err(BatchError::ChunkFailures { operation, failed, total: statuses.len() });
    }
    Ok(())
}

/// Run `iterations` compress/decompress cycles of `data` through `manager`.
///
/// `on_iteration` is called after each cycle, e.g. to advance a progress bar
/// or write a CSV row.
pub fn run_benchmark(
    data: &[u8],
    manager: &mut dyn ManagerBase,
    iterations: usize,
    verbose_memory: bool,
    mut on_iteration: impl FnMut(&IterationRow),
) -> Result<BenchReport> {
    if iterations == 0 {
        return Err(BatchError::InvalidArgument("iteration count must be positive".into()));
    }
    let device = manager.stream().device().clone();
    let stream = manager.stream().clone();
    let num_chunks = manager.num_chunks(data.len());

    let input = device.alloc_from(data)?;
    let compressed = device.alloc::<u8>(manager.get_compressed_output_size(data.len()))?;
    let statuses = device.alloc::<ChunkStatus>(num_chunks)?;
    let decompressed = device.alloc::<u8>(data.len())?;

    let mut rows = Vec::with_capacity(iterations);
    let mut compressed_bytes = 0;
    for iteration in 0..iterations {
        let start = Instant::now();
        manager.compress(&input, data.len(), &compressed, &statuses)?;
        stream.synchronize()?;
        let compress_time = start.elapsed();
        check_statuses("compress", &statuses)?;
        compressed_bytes = manager.get_compressed_size(&compressed)?;

        let cfg = manager.configure_decompression(&compressed)?;
        if cfg.decomp_data_size != data.len() {
            return Err(BatchError::Verification(format!(
                "stream declares {} uncompressed bytes, expected {}",
                cfg.decomp_data_size,
                data.len()
            )));
        }
        let start = Instant::now();
        manager.decompress(&compressed, &decompressed, &statuses)?;
        stream.synchronize()?;
        let decompress_time = start.elapsed();
        check_statuses("decompress", &statuses)?;
        if iteration == 0 && decompressed.to_vec()? != data {
            return Err(BatchError::Verification("round trip produced different bytes".into()));
        }

        let row = IterationRow {
            iteration,
            compressed_bytes,
            compress_ms: compress_time.as_secs_f64() * 1e3,
            decompress_ms: decompress_time.as_secs_f64() * 1e3,
            compress_gbps: gbps(data.len(), compress_time),
            decompress_gbps: gbps(data.len(), decompress_time),
        };
        on_iteration(&row);
        rows.push(row);
    }

    let mean = |f: fn(&IterationRow) -> f64| rows.iter().map(f).sum::<f64>() / rows.len() as f64;
    let memory = verbose_memory.then(|| MemoryReport {
        input_bytes: input.size_bytes(),
        compressed_buffer_bytes: compressed.size_bytes(),
        decompressed_buffer_bytes: decompressed.size_bytes(),
        status_bytes: statuses.size_bytes(),
        scratch_bytes: manager.scratch_size(),
    });
    let report = BenchReport {
        format: manager.format(),
        chunk_size: manager.config().chunk_size,
        num_chunks,
        uncompressed_bytes: data.len(),
        compressed_bytes,
        compression_ratio: if compressed_bytes == 0 {
            0.0
        } else {
            data.len() as f64 / compressed_bytes as f64
        },
        compress_gbps: mean(|r| r.compress_gbps),
        decompress_gbps: mean(|r| r.decompress_gbps),
        memory,
        iterations: rows,
    };
    info!(
        format = %report.format,
        ratio = report.compression_ratio,
        compress_gbps = report.compress_gbps,
        decompress_gbps = report.decompress_gbps,
        "benchmark finished"
    );
    Ok(report)
}
