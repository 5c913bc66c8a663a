//! Batched, chunked compression on an accelerator device.
//!
//! Input is split into fixed-size chunks which a [`BatchManager`] compresses
//! or decompresses in one parallel dispatch on a [`Stream`]. The output is a
//! self-describing stream: a [`CommonHeader`], the codec's format header,
//! per-chunk offset and size tables, optional CRC-32 tables, then the packed
//! chunk data. Codecs plug in through the [`Codec`] trait.

mod error;

pub mod bench;
pub mod cascaded;
pub mod checksum;
pub mod chunking;
pub mod codec;
pub mod config;
pub mod deflate;
pub mod device;
pub mod factory;
pub mod gpu;
pub mod header;
pub mod io_utils;
pub mod kernel;
pub mod lz4;
pub mod manager;
pub mod snappy;
pub mod status;
pub mod stream;

pub use cascaded::{Cascaded, CascadedFormatHeader, CascadedOptions};
pub use checksum::ChecksumMode;
pub use chunking::ChunkMap;
pub use codec::{Codec, DataType, Format, MAX_CHUNK_SIZE};
pub use config::{BatchConfig, DEFAULT_CHUNK_SIZE};
pub use deflate::{Deflate, DeflateFormatHeader};
pub use device::{Device, DeviceBuffer, DeviceElement, DeviceProperties};
pub use error::{BatchError, Result};
pub use factory::{create_manager, create_manager_from_header, CodecChoice};
pub use header::{CommonHeader, StreamLayout, COMMON_HEADER_SIZE};
pub use lz4::{Lz4, Lz4FormatHeader};
pub use manager::{
    compress_bytes, decompress_bytes, BatchManager, DecompressionConfig, HostBatch, ManagerBase,
};
pub use snappy::{Snappy, SnappyFormatHeader};
pub use status::ChunkStatus;
pub use stream::Stream;
