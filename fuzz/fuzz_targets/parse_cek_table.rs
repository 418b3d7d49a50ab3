#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_wire::crypto::{CekTable, CryptoMetadata};

fuzz_target!(|data: &[u8]| {
    let mut cursor = data;
    let _ = CekTable::decode(&mut cursor);

    let mut cursor = data;
    let _ = CryptoMetadata::decode(&mut cursor);
});
