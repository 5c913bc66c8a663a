use chunkbatch::{
    compress_bytes, decompress_bytes, BatchConfig, BatchError, CascadedOptions, ChecksumMode,
    ChunkMap, ChunkStatus, CodecChoice, CommonHeader, DataType, Device, DeviceProperties, Format,
    ManagerBase, Stream,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn stream() -> Stream {
    Device::with_properties(
        0,
        DeviceProperties {
            name: "safety".into(),
            compute_units: 2,
            max_resident_blocks_per_unit: 2,
            memory_bytes: 256 << 20,
        },
    )
    .create_stream()
    .unwrap()
}

fn packed(mgr: &mut dyn ManagerBase) -> Vec<u8> {
    let data: Vec<u8> = (0..30_000u32).map(|i| ((i / 5) % 61) as u8).collect();
    compress_bytes(mgr, &data).unwrap().data
}

#[test]
fn truncated_stream_is_a_header_error() {
    let s = stream();
    let mut mgr = CodecChoice::Lz4 { data_type: DataType::Char }
        .build(&BatchConfig::new(4096), &s)
        .unwrap();
    let stream_bytes = packed(mgr.as_mut());
    for cut in [1, 17, stream_bytes.len() / 2] {
        let truncated = &stream_bytes[..stream_bytes.len() - cut];
        assert!(matches!(
            decompress_bytes(mgr.as_mut(), truncated),
            Err(BatchError::Header(_))
        ));
    }
    assert!(decompress_bytes(mgr.as_mut(), &stream_bytes[..10]).is_err());
}

#[test]
fn random_bit_flips_never_panic() {
    let s = stream();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for choice in [
        CodecChoice::Snappy,
        CodecChoice::Lz4 { data_type: DataType::Char },
        CodecChoice::Cascaded(CascadedOptions::default()),
        CodecChoice::Cascaded(CascadedOptions { use_bp: false, data_type: DataType::Short, ..CascadedOptions::default() }),
    ] {
        let mut mgr = choice.build(&BatchConfig::new(4096), &s).unwrap();
        let original = packed(mgr.as_mut());
        let mut corrupted_results = 0;
        for _ in 0..200 {
            let mut buf = original.clone();
            for _ in 0..rng.gen_range(1..4) {
                let bit = rng.gen_range(0..buf.len() * 8);
                buf[bit / 8] ^= 1 << (bit % 8);
            }
            match decompress_bytes(mgr.as_mut(), &buf) {
                Ok(out) if out.failures() > 0 => corrupted_results += 1,
                Ok(_) | Err(_) => {}
            }
        }
        // The stream stays usable after every failure.
        s.synchronize().unwrap();
        assert!(corrupted_results > 0, "{choice:?}");
    }
}

#[test]
fn bogus_offsets_are_cannot_decompress() {
    let s = stream();
    let mut mgr = CodecChoice::Snappy.build(&BatchConfig::new(4096), &s).unwrap();
    let mut buf = packed(mgr.as_mut());
    let header = CommonHeader::parse(&buf).unwrap();
    let layout = header.layout();
    let offsets = layout.offsets();
    // Point chunk 0 past the end and chunk 1 into the header.
    buf[offsets.start..offsets.start + 8].copy_from_slice(&u64::MAX.to_le_bytes());
    buf[offsets.start + 8..offsets.start + 16].copy_from_slice(&0u64.to_le_bytes());
    let out = decompress_bytes(mgr.as_mut(), &buf).unwrap();
    assert_eq!(out.statuses[0], chunkbatch::ChunkStatus::CannotDecompress);
    assert_eq!(out.statuses[1], chunkbatch::ChunkStatus::CannotDecompress);
    assert!(out.statuses[2..].iter().all(|s| s.is_success()));
}

#[test]
fn header_without_body_is_rejected_before_sizing_output() {
    let s = stream();
    let mut mgr = CodecChoice::Snappy.build(&BatchConfig::new(4096), &s).unwrap();
    let chunks = ChunkMap::new(1 << 38, 1 << 24);
    let mut header = CommonHeader::new(Format::Snappy, ChecksumMode::NoComputeNoVerify, 0, &chunks);
    header.compressed_total_size = header.layout().payload_start() as u64 + 16;
    let bytes = header.to_bytes();
    assert_eq!(CommonHeader::parse(&bytes).unwrap().num_chunks, 16_384);

    let input = s.device().alloc_from(&bytes).unwrap();
    assert!(matches!(mgr.configure_decompression(&input), Err(BatchError::Header(_))));
    assert!(matches!(decompress_bytes(mgr.as_mut(), &bytes), Err(BatchError::Header(_))));
}

#[test]
fn short_output_marks_trailing_chunks() {
    let s = stream();
    let dev = s.device().clone();
    let mut mgr = CodecChoice::Lz4 { data_type: DataType::Char }
        .build(&BatchConfig::new(1000), &s)
        .unwrap();
    let data: Vec<u8> = (0..3500u32).map(|i| (i % 7) as u8).collect();
    let packed = compress_bytes(mgr.as_mut(), &data).unwrap();
    assert_eq!(packed.failures(), 0);

    let input = dev.alloc_from(&packed.data).unwrap();
    let output = dev.alloc::<u8>(2500).unwrap();
    let statuses = dev.alloc::<ChunkStatus>(4).unwrap();
    mgr.decompress(&input, &output, &statuses).unwrap();
    s.synchronize().unwrap();
    assert_eq!(
        statuses.to_vec().unwrap(),
        vec![
            ChunkStatus::Success,
            ChunkStatus::Success,
            ChunkStatus::OutputBufferTooSmall,
            ChunkStatus::OutputBufferTooSmall,
        ]
    );
    assert_eq!(output.to_vec().unwrap()[..2000], data[..2000]);
}
