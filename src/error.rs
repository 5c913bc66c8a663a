use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    /// Invalid chunk size, unsupported format parameters, or a manager that
    /// could not be brought up.
    #[error("configuration error: {0}")]
    Config(String),

    /// Allocation or dispatch failure on the device. The device context is
    /// considered unusable after one of these.
    #[error("device error: {0}")]
    Device(String),

    /// Malformed or unsupported compressed stream header.
    #[error("header error: {0}")]
    Header(String),

    /// A caller supplied buffer is smaller than the operation requires.
    #[error("{what} buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall {
        what: &'static str,
        needed: usize,
        actual: usize,
    },

    /// Argument combination rejected before any work was enqueued.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Chunks of a finished batch reported a non-success status.
    #[error("{operation}: {failed} of {total} chunks failed")]
    ChunkFailures {
        operation: &'static str,
        failed: usize,
        total: usize,
    },

    /// Decompressed data differs from the original.
    #[error("verification failed: {0}")]
    Verification(String),

    /// Propagated I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = BatchError> = std::result::Result<T, E>;
