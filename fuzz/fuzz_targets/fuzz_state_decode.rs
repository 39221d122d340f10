#![no_main]

use libfuzzer_sys::fuzz_target;
use kalma::fuzz_api::decode_oauth_state;

fuzz_target!(|data: &[u8]| {
    if let Ok(raw) = std::str::from_utf8(data) {
        let _ = decode_oauth_state(raw);
    }
});
