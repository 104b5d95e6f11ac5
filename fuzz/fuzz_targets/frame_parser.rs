//! Fuzz target for MSRP frame decoding
//!
//! The decoder must return `Ok` or `Err` for any input, never panic.
//! Decoded messages are re-encoded to exercise the encoder as well.

#![no_main]

use libfuzzer_sys::fuzz_target;
use msrp_core::{decode, encode};

fuzz_target!(|data: &[u8]| {
    if let Ok(mut message) = decode(data) {
        let frame = encode(&mut message);
        let _ = decode(&frame);
    }
});
