//! Fuzz target: JSON deserialization of the `POST /v1/tasks` body.
//!
//! Errors are expected; panics are not.

#![no_main]

use libfuzzer_sys::fuzz_target;
use litegix_core::TaskConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(config) = serde_json::from_slice::<TaskConfig>(data) {
        let _ = config.decode_driver_config();
    }
});
