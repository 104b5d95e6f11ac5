//! Fuzz target for stream framing
//!
//! Feeds arbitrary bytes in arbitrary slices; the framer must never panic
//! and every frame it yields is bounded by the configured size.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use msrp_core::StreamFramer;

const MAX_FRAME: usize = 4096;

#[derive(Debug, Arbitrary)]
struct Input {
    cuts: Vec<u8>,
    stream: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let mut framer = StreamFramer::new(MAX_FRAME);
    let mut rest = input.stream.as_slice();
    let mut cuts = input.cuts.iter().copied().cycle();
    while !rest.is_empty() {
        let step = usize::from(cuts.next().unwrap_or(u8::MAX)).clamp(1, rest.len());
        framer.push(&rest[..step]);
        rest = &rest[step..];
        loop {
            match framer.next_frame() {
                Ok(Some(frame)) => {
                    assert!(frame.len() <= MAX_FRAME);
                    let _ = msrp_core::decode(&frame);
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
});
