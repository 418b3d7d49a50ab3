#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_wire::PacketHeader;

fuzz_target!(|data: &[u8]| {
    if data.len() >= 8 {
        let mut cursor = data;
        if let Ok(header) = PacketHeader::decode(&mut cursor) {
            let _ = header.validate_length(4096);
            let _ = header.payload_length();
        }
    }
});
