//! Fuzz target for `WWW-Authenticate` digest challenge parsing

#![no_main]

use libfuzzer_sys::fuzz_target;
use msrp_crypto::{Credentials, DigestChallenge, DigestResponse};

fuzz_target!(|data: &[u8]| {
    let Ok(value) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(challenge) = DigestChallenge::parse(value) {
        let credentials = Credentials::new("fuzz", "fuzz");
        let _ = DigestResponse::compute(&challenge, &credentials, "AUTH", "msrps://relay.example.com;tcp", 1, "0a4f113b");
    }
});
