//! Build the right manager for a stream whose format is not known up front.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{Codec, DataType, Format};
use crate::header::{decode_format_header, CommonHeader};
use crate::deflate::DEFAULT_LEVEL;
use crate::{
    BatchConfig, BatchManager, Cascaded, CascadedOptions, Deflate, DeviceBuffer, Lz4, ManagerBase,
    Result, Snappy, Stream,
};

/// A codec with its parameters, selected at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum CodecChoice {
    Snappy,
    Lz4 { data_type: DataType },
    Cascaded(CascadedOptions),
    #[serde(alias = "gdeflate")]
    Deflate {
        #[serde(default = "default_deflate_level")]
        level: u8,
    },
}

fn default_deflate_level() -> u8 {
    DEFAULT_LEVEL
}

impl CodecChoice {
    pub fn format(&self) -> Format {
        match self {
            CodecChoice::Snappy => Format::Snappy,
            CodecChoice::Lz4 { .. } => Format::Lz4,
            CodecChoice::Cascaded(_) => Format::Cascaded,
            CodecChoice::Deflate { .. } => Format::Deflate,
        }
    }

    /// Default parameters for `format`.
    pub fn with_defaults(format: Format) -> Self {
        match format {
            Format::Snappy => CodecChoice::Snappy,
            Format::Lz4 => CodecChoice::Lz4 { data_type: DataType::default() },
            Format::Cascaded => CodecChoice::Cascaded(CascadedOptions::default()),
            Format::Deflate => CodecChoice::Deflate { level: DEFAULT_LEVEL },
        }
    }

    pub fn build(self, config: &BatchConfig, stream: &Stream) -> Result<Box<dyn ManagerBase>> {
        Ok(match self {
            CodecChoice::Snappy => Box::new(BatchManager::new(Snappy, config, stream)?),
            CodecChoice::Lz4 { data_type } => {
                Box::new(BatchManager::new(Lz4::new(data_type), config, stream)?)
            }
            CodecChoice::Cascaded(opts) => {
                Box::new(BatchManager::new(Cascaded::new(opts)?, config, stream)?)
            }
            CodecChoice::Deflate { level } => {
                Box::new(BatchManager::new(Deflate::new(level)?, config, stream)?)
            }
        })
    }
}

/// Create a manager able to decompress the stream held in `compressed`.
///
/// The buffer must not have work pending on it.
pub fn create_manager(compressed: &DeviceBuffer<u8>, stream: &Stream) -> Result<Box<dyn ManagerBase>> {
    let data = compressed.read()?;
    create_manager_from_header(&data, stream)
}

/// Create a manager from the leading bytes of a stream. Only the headers are
/// read; the chunk size, checksum mode and codec parameters all come from
/// the stream.
pub fn create_manager_from_header(data: &[u8], stream: &Stream) -> Result<Box<dyn ManagerBase>> {
    let header = CommonHeader::parse(data)?;
    let format_header = data.get(header.layout().format_header()).ok_or_else(|| {
        crate::BatchError::Header("stream ends inside the format header".into())
    })?;
    let config = BatchConfig {
        chunk_size: header.uncompressed_chunk_size as usize,
        checksum_mode: header.checksum_mode()?,
        device_id: stream.device().id(),
    };
    let choice = match header.format()? {
        Format::Snappy => CodecChoice::Snappy,
        Format::Lz4 => {
            let lz4 = Lz4::from_format_header(&decode_format_header(format_header)?)?;
            CodecChoice::Lz4 { data_type: lz4.data_type() }
        }
        Format::Cascaded => {
            let cascaded = Cascaded::from_format_header(&decode_format_header(format_header)?)?;
            CodecChoice::Cascaded(cascaded.options())
        }
        Format::Deflate => {
            let deflate = Deflate::from_format_header(&decode_format_header(format_header)?)?;
            CodecChoice::Deflate { level: deflate.level() }
        }
    };
    debug!(?choice, chunk_size = config.chunk_size, "manager from stream header");
    choice.build(&config, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::compress_bytes;
    use crate::{ChecksumMode, Device, DeviceProperties};

    fn stream() -> Stream {
        Device::with_properties(
            0,
            DeviceProperties {
                name: "test".into(),
                compute_units: 1,
                max_resident_blocks_per_unit: 2,
                memory_bytes: 64 << 20,
            },
        )
        .create_stream()
        .unwrap()
    }

    #[test]
    fn recovers_parameters_from_header() {
        let s = stream();
        let opts = CascadedOptions { num_rles: 1, num_deltas: 2, use_bp: false, data_type: DataType::Short };
        let cfg = BatchConfig::new(512).with_checksum_mode(ChecksumMode::ComputeAndVerify);
        let mut mgr = CodecChoice::Cascaded(opts).build(&cfg, &s).unwrap();
        let packed = compress_bytes(mgr.as_mut(), &[3u8; 2048]).unwrap();

        let rebuilt = create_manager_from_header(&packed.data, &s).unwrap();
        assert_eq!(rebuilt.format(), Format::Cascaded);
        assert_eq!(rebuilt.config(), &cfg);
        assert_eq!(rebuilt.format_header_bytes(), mgr.format_header_bytes());
    }

    #[test]
    fn garbage_is_a_header_error() {
        assert!(matches!(
            create_manager_from_header(&[0u8; 64], &stream()),
            Err(crate::BatchError::Header(_))
        ));
    }
}
