#![no_main]

use libfuzzer_sys::fuzz_target;
use tds_wire::token::{
    Done, EnvChange, FedAuthInfo, LoginAck, ServerError, decode_feature_ext_ack,
};

fuzz_target!(|data: &[u8]| {
    // Each decoder gets its own cursor; the first byte selects which
    // body shape to exercise.
    let Some((&selector, body)) = data.split_first() else {
        return;
    };

    match selector % 6 {
        0 => {
            let mut cursor = body;
            let _ = ServerError::decode_body(&mut cursor);
        }
        1 => {
            let mut cursor = body;
            let _ = LoginAck::decode_body(&mut cursor);
        }
        2 => {
            let mut cursor = body;
            let _ = EnvChange::decode_body(&mut cursor);
        }
        3 => {
            let mut cursor = body;
            let _ = Done::decode(&mut cursor);
        }
        4 => {
            let mut cursor = body;
            let _ = decode_feature_ext_ack(&mut cursor);
        }
        _ => {
            let _ = FedAuthInfo::decode_body(body);
        }
    }
});
