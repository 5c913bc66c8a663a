use chunkbatch::{create_manager_from_header, decompress_bytes, Device};
use honggfuzz::fuzz;

fn main() {
    let stream = Device::open(0)
        .and_then(|d| d.create_stream())
        .expect("host device");
    loop {
        fuzz!(|data: &[u8]| {
            if let Ok(mut mgr) = create_manager_from_header(data, &stream) {
                let _ = decompress_bytes(mgr.as_mut(), data);
            }
        });
    }
}
