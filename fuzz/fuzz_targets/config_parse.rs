//! Fuzz target for configuration parsing
//!
//! Arbitrary TOML must deserialize or fail cleanly, and validation must
//! never panic on whatever deserialized.

#![no_main]

use libfuzzer_sys::fuzz_target;
use msrp_core::Config;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = toml::from_str::<Config>(s) {
            let _ = config.validate();
            let _ = config.relay_uri();
        }
    }
});
