//! Fuzz target for engine reply and handshake decoding.
//!
//! Arbitrary engine output must decode to Ok or Err, never panic.

#![no_main]

use alpaca_serve::engine::protocol::{decode_handshake, decode_response};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(line) = std::str::from_utf8(data) {
        let _ = decode_response(line);
        let _ = decode_handshake(line);
    }
});
