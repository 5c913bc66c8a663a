use chunkbatch::CommonHeader;
use honggfuzz::fuzz;

fn main() {
    loop {
        fuzz!(|data: &[u8]| {
            if let Ok(header) = CommonHeader::parse(data) {
                let again = CommonHeader::parse(&header.to_bytes()).expect("reparse");
                assert_eq!(header, again);
            }
        });
    }
}
