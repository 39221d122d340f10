#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use kalma::fuzz_api::verify_webhook_signature;

#[derive(Arbitrary, Debug)]
struct Input {
    secret: String,
    header_value: String,
    body: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let _ = verify_webhook_signature(&input.secret, &input.header_value, &input.body);
});
