#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_connect::parse_insert_table_name;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = parse_insert_table_name(s);
    }
});
