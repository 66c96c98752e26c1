//! Fuzz target: `docker save` manifest parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use litegix_executor::image::parse_manifest;

fuzz_target!(|data: &[u8]| {
    let _ = parse_manifest(data);
});
