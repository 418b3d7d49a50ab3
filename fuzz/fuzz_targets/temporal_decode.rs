#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_wire::temporal;

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }
    let scale = data[0] % 8;
    let body = &data[1..];

    if body.len() >= temporal::DAYS_INTO_CE_LENGTH {
        if let Ok(days) = temporal::decode_days_into_ce(&body[..temporal::DAYS_INTO_CE_LENGTH]) {
            let _ = temporal::date_from_days(days);
        }
    }

    let len = temporal::time_value_length(scale);
    if body.len() >= len {
        if let Ok(nanos) = temporal::decode_nanos_since_midnight(&body[..len], scale) {
            let _ = temporal::time_from_nanos(nanos);
        }
    }
});
