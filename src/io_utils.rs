//! Error reporting helpers shared by the command line tools.

use std::fmt;
use std::io;
use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::BatchError;

/// Extension written by `chunkbatch compress`.
pub const STREAM_EXTENSION: &str = "cbat";

#[derive(Debug)]
pub struct CliError {
    pub msg: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.msg.fmt(f)
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Install the stderr log subscriber. `RUST_LOG` overrides `default_level`.
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Format a user friendly I/O error message with suggestions.
pub fn format_io_error(operation: &str, path: &Path, err: &io::Error) -> String {
    use io::ErrorKind::*;
    let suggestion = match err.kind() {
        NotFound => "Check that the file exists and the path is correct.",
        PermissionDenied => "Check permissions or run as a different user.",
        UnexpectedEof => "File appears truncated or corrupted.",
        WriteZero => "Disk may be full. Free up space and try again.",
        Other if err.raw_os_error() == Some(28) => "Disk may be full. Free up space and try again.",
        _ => "Check permissions or free up disk space.",
    };
    format!("Error {} '{}': {}. {}", operation, path.display(), err, suggestion)
}

/// Convert an I/O error into a CLI error with context.
pub fn io_cli_error(operation: &str, path: &Path, err: io::Error) -> CliError {
    CliError {
        msg: format_io_error(operation, path, &err),
        source: Some(Box::new(err)),
    }
}

pub fn simple_cli_error(msg: &str) -> CliError {
    CliError {
        msg: msg.to_string(),
        source: None,
    }
}

/// Rejects paths that do not carry the stream extension.
pub fn check_extension(path: &Path) -> Result<(), CliError> {
    let ok = path
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(STREAM_EXTENSION));
    if ok {
        Ok(())
    } else {
        Err(CliError {
            msg: format!(
                "Invalid file extension for '{}'. Expected .{STREAM_EXTENSION}. Check the input file.",
                path.display()
            ),
            source: None,
        })
    }
}

/// Convert a library error into a CLI error with a hint.
pub fn batch_cli_error(context: &str, err: BatchError) -> CliError {
    CliError {
        msg: format!("{}: {}", context, cli_hint(&err)),
        source: Some(Box::new(err)),
    }
}

/// Return an actionable hint for a library error variant.
pub fn cli_hint(err: &BatchError) -> String {
    use BatchError::*;
    match err {
        Config(msg) => format!("{msg}. Check the chunk size and codec options."),
        Device(msg) => format!("{msg}. The device is unusable, restart the operation."),
        Header(msg) => format!("{msg}. Verify the file is an intact chunkbatch stream."),
        BufferTooSmall { .. } => format!("{err}. This is a bug."),
        InvalidArgument(msg) => format!("{msg}. Check the command line."),
        ChunkFailures { .. } => format!("{err}. The stream is likely corrupted, try recompressing."),
        Verification(msg) => format!("{msg}. Data did not survive the round trip."),
        Io(io) => format!("{io}"),
        Json(e) => format!("{e}. Check the configuration file."),
    }
}
