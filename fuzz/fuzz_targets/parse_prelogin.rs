#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_wire::PreLogin;

fuzz_target!(|data: &[u8]| {
    let _ = PreLogin::decode(data);
});
