use std::time::Instant;

use chunkbatch::{
    compress_bytes, decompress_bytes, BatchConfig, CascadedOptions, CodecChoice, DataType, Device,
};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use sysinfo::{ProcessExt, System, SystemExt};

fn profile_case(name: &str, choice: CodecChoice, data: Vec<u8>) {
    let mut sys = System::new_all();
    let pid = sysinfo::get_current_pid().unwrap();
    sys.refresh_process(pid);
    let before_mem = sys.process(pid).map(|p| p.memory()).unwrap_or(0);

    let stream = Device::open(0).unwrap().create_stream().unwrap();
    let mut mgr = choice.build(&BatchConfig::default(), &stream).unwrap();

    let start = Instant::now();
    let packed = compress_bytes(mgr.as_mut(), &data).expect("compress");
    let comp_time = start.elapsed();
    sys.refresh_process(pid);
    let after_comp_mem = sys.process(pid).map(|p| p.memory()).unwrap_or(0);

    let start = Instant::now();
    let unpacked = decompress_bytes(mgr.as_mut(), &packed.data).expect("decompress");
    let decomp_time = start.elapsed();
    sys.refresh_process(pid);
    let after_decomp_mem = sys.process(pid).map(|p| p.memory()).unwrap_or(0);

    assert_eq!(unpacked.failures(), 0);
    assert_eq!(data, unpacked.data);

    println!(
        "{name}: input={:.1}MB compressed={:.1}MB ratio={:.2} comp_time={:.2?} decomp_time={:.2?} mem_before={}KB mem_after_comp={}KB mem_after_decomp={}KB",
        data.len() as f64 / 1_048_576.0,
        packed.data.len() as f64 / 1_048_576.0,
        data.len() as f64 / packed.data.len() as f64,
        comp_time,
        decomp_time,
        before_mem / 1024,
        after_comp_mem / 1024,
        after_decomp_mem / 1024,
    );
}

#[test]
#[ignore]
fn large_inputs() {
    let size = 256 * 1024 * 1024;
    let mut random = vec![0u8; size];
    StdRng::seed_from_u64(42).fill_bytes(&mut random);
    profile_case("random-snappy", CodecChoice::Snappy, random.clone());
    profile_case("random-lz4", CodecChoice::Lz4 { data_type: DataType::Char }, random);

    let ints: Vec<u8> = (0..(size / 4) as u32).flat_map(|i| (i / 16).to_le_bytes()).collect();
    profile_case(
        "sorted-ints-cascaded",
        CodecChoice::Cascaded(CascadedOptions { data_type: DataType::Int, ..CascadedOptions::default() }),
        ints,
    );
}
