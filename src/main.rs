use std::fs;
use std::path::{Path, PathBuf};

use chunkbatch::io_utils::{
    batch_cli_error, check_extension, init_logging, io_cli_error, simple_cli_error,
};
use chunkbatch::{
    compress_bytes, create_manager_from_header, decompress_bytes, BatchConfig, CascadedOptions,
    ChecksumMode, CodecChoice, DataType, Device, Format,
};
use clap::{Parser, Subcommand};

/// Compress files into chunkbatch streams and back.
#[derive(Parser)]
#[command(name = "chunkbatch", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compress a file into a .cbat stream
    Compress {
        input: PathBuf,
        output: PathBuf,
        /// snappy, lz4, cascaded or deflate
        #[arg(long, default_value = "lz4")]
        format: Format,
        /// Uncompressed bytes per chunk (overrides the config file)
        #[arg(long)]
        chunk_size: Option<usize>,
        /// none, compute or verify (overrides the config file)
        #[arg(long)]
        checksum: Option<ChecksumMode>,
        /// Element type for lz4 and cascaded: char, short, int or longlong
        #[arg(long = "type", default_value = "char")]
        data_type: DataType,
        /// Cascaded run-length passes
        #[arg(long, default_value_t = 2)]
        rles: u8,
        /// Cascaded delta passes
        #[arg(long, default_value_t = 1)]
        deltas: u8,
        /// Disable cascaded bit packing
        #[arg(long)]
        no_bp: bool,
        /// Deflate compression level, 0 to 9
        #[arg(long, default_value_t = chunkbatch::deflate::DEFAULT_LEVEL)]
        level: u8,
        /// JSON file with chunk_size, checksum_mode and device_id
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Decompress a .cbat stream
    Decompress {
        input: PathBuf,
        output: PathBuf,
        /// Device to run on
        #[arg(long, default_value_t = 0)]
        device: usize,
    },
}

fn main() {
    init_logging("warn");
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {
        Command::Compress {
            input,
            output,
            format,
            chunk_size,
            checksum,
            data_type,
            rles,
            deltas,
            no_bp,
            level,
            config,
        } => {
            let mut cfg = match &config {
                Some(path) => BatchConfig::from_json_file(path)
                    .map_err(|e| batch_cli_error("loading configuration", e))?,
                None => BatchConfig::default(),
            };
            if let Some(chunk_size) = chunk_size {
                cfg.chunk_size = chunk_size;
            }
            if let Some(mode) = checksum {
                cfg.checksum_mode = mode;
            }
            let choice = match format {
                Format::Snappy => CodecChoice::Snappy,
                Format::Lz4 => CodecChoice::Lz4 { data_type },
                Format::Cascaded => CodecChoice::Cascaded(CascadedOptions {
                    num_rles: rles,
                    num_deltas: deltas,
                    use_bp: !no_bp,
                    data_type,
                }),
                Format::Deflate => CodecChoice::Deflate { level },
            };
            compress_file(&input, &output, choice, &cfg)
        }
        Command::Decompress { input, output, device } => decompress_file(&input, &output, device),
    }
}

fn compress_file(
    input: &Path,
    output: &Path,
    choice: CodecChoice,
    cfg: &BatchConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input).map_err(|e| io_cli_error("reading input file", input, e))?;
    let device = Device::open(cfg.device_id).map_err(|e| batch_cli_error("opening device", e))?;
    let stream = device
        .create_stream()
        .map_err(|e| batch_cli_error("creating stream", e))?;
    let mut manager = choice
        .build(cfg, &stream)
        .map_err(|e| batch_cli_error("configuring compressor", e))?;
    let packed = compress_bytes(manager.as_mut(), &data)
        .map_err(|e| batch_cli_error("compressing", e))?;
    if packed.failures() > 0 {
        return Err(simple_cli_error(&format!(
            "compressing: {} of {} chunks failed",
            packed.failures(),
            packed.statuses.len()
        ))
        .into());
    }
    fs::write(output, &packed.data).map_err(|e| io_cli_error("writing output file", output, e))?;
    eprintln!(
        "Compressed {} -> {} bytes with {} ({} chunks)",
        data.len(),
        packed.data.len(),
        choice.format(),
        packed.statuses.len()
    );
    Ok(())
}

fn decompress_file(input: &Path, output: &Path, device: usize) -> Result<(), Box<dyn std::error::Error>> {
    check_extension(input)?;
    let data = fs::read(input).map_err(|e| io_cli_error("reading input file", input, e))?;
    let device = Device::open(device).map_err(|e| batch_cli_error("opening device", e))?;
    let stream = device
        .create_stream()
        .map_err(|e| batch_cli_error("creating stream", e))?;
    let mut manager = create_manager_from_header(&data, &stream)
        .map_err(|e| batch_cli_error("reading stream header", e))?;
    let unpacked = decompress_bytes(manager.as_mut(), &data)
        .map_err(|e| batch_cli_error("decompressing", e))?;
    if unpacked.failures() > 0 {
        let first = unpacked
            .statuses
            .iter()
            .position(|s| !s.is_success())
            .unwrap_or_default();
        return Err(simple_cli_error(&format!(
            "decompressing: {} of {} chunks failed (first: chunk {first}, {}). The stream is likely corrupted.",
            unpacked.failures(),
            unpacked.statuses.len(),
            unpacked.statuses[first]
        ))
        .into());
    }
    fs::write(output, &unpacked.data).map_err(|e| io_cli_error("writing output file", output, e))?;
    Ok(())
}
