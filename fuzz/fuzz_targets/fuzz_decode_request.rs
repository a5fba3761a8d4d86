//! Fuzz target for request line decoding used by the mock engine.

#![no_main]

use alpaca_serve::engine::protocol::{decode_request, encode_request};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(line) = std::str::from_utf8(data) {
        if let Ok(request) = decode_request(line) {
            // Anything that decodes must encode back to a single line.
            if let Ok(encoded) = encode_request(&request) {
                assert!(!encoded.contains('\n'));
            }
        }
    }
});
