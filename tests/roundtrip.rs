use chunkbatch::{
    compress_bytes, decompress_bytes, BatchConfig, CascadedOptions, ChecksumMode, ChunkStatus,
    CodecChoice, DataType, Device, DeviceProperties, Stream,
};
use proptest::prelude::*;

fn stream() -> Stream {
    Device::with_properties(
        0,
        DeviceProperties {
            name: "roundtrip".into(),
            compute_units: 4,
            max_resident_blocks_per_unit: 2,
            memory_bytes: 256 << 20,
        },
    )
    .create_stream()
    .unwrap()
}

fn choices() -> Vec<CodecChoice> {
    vec![
        CodecChoice::Snappy,
        CodecChoice::Lz4 { data_type: DataType::Char },
        CodecChoice::Cascaded(CascadedOptions::default()),
        CodecChoice::Cascaded(CascadedOptions {
            num_rles: 0,
            num_deltas: 2,
            use_bp: true,
            data_type: DataType::Int,
        }),
        CodecChoice::Deflate { level: 1 },
        CodecChoice::Deflate { level: 9 },
    ]
}

fn roundtrip(choice: CodecChoice, data: &[u8], chunk_size: usize, mode: ChecksumMode) {
    let s = stream();
    let cfg = BatchConfig::new(chunk_size).with_checksum_mode(mode);
    let mut mgr = choice.build(&cfg, &s).unwrap();
    let packed = compress_bytes(mgr.as_mut(), data).unwrap();
    assert!(packed.statuses.iter().all(|s| *s == ChunkStatus::Success));
    let unpacked = decompress_bytes(mgr.as_mut(), &packed.data).unwrap();
    assert_eq!(unpacked.failures(), 0, "{choice:?} chunk {chunk_size}");
    assert_eq!(unpacked.data, data, "{choice:?} chunk {chunk_size}");
}

#[test]
fn empty_input_roundtrips() {
    for choice in choices() {
        roundtrip(choice, &[], 4096, ChecksumMode::ComputeAndVerify);
    }
}

#[test]
fn text_roundtrips_in_every_mode() {
    let text = b"the quick brown fox jumps over the lazy dog. ".repeat(2000);
    for choice in choices() {
        for mode in [
            ChecksumMode::NoComputeNoVerify,
            ChecksumMode::ComputeAndNoVerify,
            ChecksumMode::ComputeAndVerify,
        ] {
            roundtrip(choice, &text, 8192, mode);
        }
    }
}

#[test]
fn short_tail_roundtrips() {
    let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    for choice in choices() {
        roundtrip(choice, &data, 65_536, ChecksumMode::NoComputeNoVerify);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn random_data_roundtrips(
        data in proptest::collection::vec(any::<u8>(), 0..20_000),
        chunk_shift in 2u32..14,
        pick in 0usize..4,
    ) {
        let chunk_size = 1usize << chunk_shift;
        roundtrip(choices()[pick], &data, chunk_size, ChecksumMode::ComputeAndVerify);
    }

    #[test]
    fn runs_roundtrip_through_cascaded(
        runs in proptest::collection::vec((any::<u8>(), 1usize..300), 0..100),
        data_type in prop_oneof![
            Just(DataType::Char),
            Just(DataType::Short),
            Just(DataType::Int),
            Just(DataType::LongLong),
        ],
    ) {
        let data: Vec<u8> = runs
            .iter()
            .flat_map(|&(byte, len)| std::iter::repeat(byte).take(len))
            .collect();
        let choice = CodecChoice::Cascaded(CascadedOptions { data_type, ..CascadedOptions::default() });
        roundtrip(choice, &data, 1024, ChecksumMode::NoComputeNoVerify);
    }
}
