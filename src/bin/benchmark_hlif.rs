use std::path::PathBuf;

use chunkbatch::bench::{load_dataset_from_binary, run_benchmark, IterationRow};
use chunkbatch::io_utils::{batch_cli_error, init_logging, io_cli_error};
use chunkbatch::cascaded::CASCADED_DEFAULT_CHUNK_SIZE;
use chunkbatch::deflate::DEFAULT_LEVEL;
use chunkbatch::{
    BatchConfig, CascadedOptions, CodecChoice, DataType, Device, Format, DEFAULT_CHUNK_SIZE,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

/// Benchmark batched compression and decompression of a binary dataset.
#[derive(Parser)]
#[command(name = "benchmark_hlif")]
struct Args {
    /// One of snappy, lz4, cascaded or gdeflate
    format: Format,
    /// Binary dataset filename
    #[arg(short = 'f', long = "filename")]
    filename: PathBuf,
    /// Chunk size in bytes [default: 65536, cascaded 4096]
    #[arg(short = 'c', long = "chunk-size")]
    chunk_size: Option<usize>,
    /// Device number
    #[arg(short = 'g', long = "gpu", default_value_t = 0)]
    gpu: usize,
    /// Number of times to execute the benchmark, for averaging
    #[arg(short = 'n', long = "num-iters", default_value_t = 1,
          value_parser = clap::value_parser!(u32).range(1..))]
    num_iters: u32,
    /// Data type: char, short, int or longlong [default: char, cascaded uses its own]
    #[arg(short = 't', long = "type")]
    data_type: Option<DataType>,
    /// Print device memory allocation sizes
    #[arg(short = 'm', long = "memory")]
    memory: bool,
    /// Cascaded run-length passes
    #[arg(short = 'r', long = "num_rles", default_value_t = 2)]
    num_rles: u8,
    /// Cascaded delta passes
    #[arg(short = 'd', long = "num_deltas", default_value_t = 1)]
    num_deltas: u8,
    /// Cascaded bit packing, 0 disables
    #[arg(short = 'b', long = "num_bps", default_value_t = 1)]
    num_bps: u8,
    /// Write one CSV row per iteration
    #[arg(long)]
    csv: Option<PathBuf>,
    /// Print the report as JSON instead of text
    #[arg(long)]
    json: bool,
}

fn main() {
    init_logging("warn");
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            println!("{e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = run(args) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    // Cascaded keeps its own chunk size and element type unless they are
    // given explicitly.
    let cascaded_defaults = CascadedOptions::default();
    let (chunk_size, data_type) = match args.format {
        Format::Cascaded => (
            args.chunk_size.unwrap_or(CASCADED_DEFAULT_CHUNK_SIZE),
            args.data_type.unwrap_or(cascaded_defaults.data_type),
        ),
        _ => (
            args.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            args.data_type.unwrap_or_default(),
        ),
    };
    let data = load_dataset_from_binary(&args.filename, data_type).map_err(|e| match e {
        chunkbatch::BatchError::Io(io) => io_cli_error("reading dataset", &args.filename, io),
        other => batch_cli_error("reading dataset", other),
    })?;

    let device = Device::open(args.gpu).map_err(|e| batch_cli_error("opening device", e))?;
    let stream = device
        .create_stream()
        .map_err(|e| batch_cli_error("creating stream", e))?;
    let config = BatchConfig::new(chunk_size).with_device_id(args.gpu);
    let choice = match args.format {
        Format::Snappy => CodecChoice::Snappy,
        Format::Lz4 => CodecChoice::Lz4 { data_type },
        Format::Cascaded => CodecChoice::Cascaded(CascadedOptions {
            num_rles: args.num_rles,
            num_deltas: args.num_deltas,
            use_bp: args.num_bps != 0,
            data_type,
        }),
        Format::Deflate => CodecChoice::Deflate { level: DEFAULT_LEVEL },
    };
    let mut manager = choice
        .build(&config, &stream)
        .map_err(|e| batch_cli_error("configuring manager", e))?;

    let mut csv = match &args.csv {
        Some(path) => Some(csv::Writer::from_path(path)?),
        None => None,
    };
    let progress = ProgressBar::new(args.num_iters as u64);
    progress.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} iterations")
            .unwrap()
            .progress_chars("#>-"),
    );
    let mut csv_error = None;
    let report = run_benchmark(
        &data,
        manager.as_mut(),
        args.num_iters as usize,
        args.memory,
        |row: &IterationRow| {
            if let Some(w) = csv.as_mut() {
                if let Err(e) = w.serialize(row) {
                    csv_error.get_or_insert(e);
                }
            }
            progress.inc(1);
        },
    );
    progress.finish_and_clear();
    let report = report.map_err(|e| batch_cli_error("benchmark", e))?;
    if let Some(e) = csv_error {
        return Err(e.into());
    }
    if let Some(mut w) = csv {
        w.flush()?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print_summary();
    }
    Ok(())
}
