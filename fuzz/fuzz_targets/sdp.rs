//! Fuzz target for SDP parsing, including the file-transfer attributes

#![no_main]

use libfuzzer_sys::fuzz_target;
use msrp_core::SessionDescription;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(sdp) = SessionDescription::parse(text) {
        for media in &sdp.media {
            let _ = media.path();
            let _ = media.accept_types();
            let _ = media.file_transfer();
        }
        let _ = SessionDescription::parse(&sdp.to_string());
    }
});
