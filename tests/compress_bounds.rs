use chunkbatch::{
    BatchConfig, BatchManager, Cascaded, CascadedOptions, ChecksumMode, Codec, DataType, Deflate,
    Device, DeviceProperties, Lz4, ManagerBase, Snappy, StreamLayout, COMMON_HEADER_SIZE,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn check_bound<C: Codec>(codec: &C, chunk_size: usize, rng: &mut StdRng) {
    let max = codec.compute_max_compressed_chunk_size(chunk_size);
    let mut out = vec![0u8; max];
    let mut ws = vec![0u64; codec.workspace_words(chunk_size)];
    for len in [0, 1, chunk_size / 3, chunk_size - 1, chunk_size] {
        let random: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        let alternating: Vec<u8> = (0..len).map(|i| if i % 2 == 0 { 0 } else { 0xFF }).collect();
        for input in [random, alternating] {
            let written = codec.compress_chunk(&input, &mut out, &mut ws).unwrap();
            assert!(written <= max, "{:?}: {written} > {max} for {len} bytes", C::FORMAT);
        }
    }
}

#[test]
fn codecs_respect_their_bounds() {
    let mut rng = StdRng::seed_from_u64(7);
    for chunk_size in [8, 64, 4096, 65_536] {
        check_bound(&Snappy, chunk_size, &mut rng);
        check_bound(&Lz4::new(DataType::Char), chunk_size, &mut rng);
        for level in [0, 1, 6, 9] {
            check_bound(&Deflate::new(level).unwrap(), chunk_size, &mut rng);
        }
        for data_type in [DataType::Char, DataType::Short, DataType::Int, DataType::LongLong] {
            for (num_rles, num_deltas, use_bp) in [(0, 0, false), (2, 1, true), (4, 4, false), (1, 3, true)] {
                let codec = Cascaded::new(CascadedOptions { num_rles, num_deltas, use_bp, data_type }).unwrap();
                check_bound(&codec, chunk_size, &mut rng);
            }
        }
    }
}

#[test]
fn bounds_are_monotonic_and_deterministic() {
    let codec = Cascaded::new(CascadedOptions::default()).unwrap();
    let mut prev = 0;
    for chunk_size in (1..=64).map(|k| k * 512) {
        for c in [
            Snappy.compute_max_compressed_chunk_size(chunk_size),
            Lz4::default().compute_max_compressed_chunk_size(chunk_size),
            Deflate::default().compute_max_compressed_chunk_size(chunk_size),
        ] {
            assert!(c >= chunk_size);
        }
        let bound = codec.compute_max_compressed_chunk_size(chunk_size);
        assert_eq!(bound, codec.compute_max_compressed_chunk_size(chunk_size));
        assert!(bound > prev);
        prev = bound;
    }
}

#[test]
fn output_size_covers_header_tables_and_chunks() {
    let stream = Device::with_properties(
        0,
        DeviceProperties {
            name: "bounds".into(),
            compute_units: 1,
            max_resident_blocks_per_unit: 1,
            memory_bytes: 64 << 20,
        },
    )
    .create_stream()
    .unwrap();
    for mode in [ChecksumMode::NoComputeNoVerify, ChecksumMode::ComputeAndVerify] {
        let cfg = BatchConfig::new(65_536).with_checksum_mode(mode);
        let mgr = BatchManager::new(Lz4::new(DataType::Int), &cfg, &stream).unwrap();
        let max = mgr.max_compressed_chunk_size();
        let size = mgr.get_compressed_output_size(200_000);
        let tables = if mode.computes() { 4 * 24 } else { 4 * 16 };
        assert_eq!(size, COMMON_HEADER_SIZE + 4 + tables + 4 * max);
        assert!(size >= COMMON_HEADER_SIZE + 2 * 4 * 8 + 4 * max);

        let layout = StreamLayout { format_header_size: 4, num_chunks: 0, checksums: mode.computes() };
        assert_eq!(mgr.get_compressed_output_size(0), layout.payload_start());
    }
}
