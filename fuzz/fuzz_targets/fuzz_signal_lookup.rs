//! Fuzz target: signal name resolution.
//!
//! Unknown names must resolve to the fallback, never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use litegix_executor::process::{resolve_signal, FALLBACK_SIGNAL};

fuzz_target!(|data: &[u8]| {
    let name = String::from_utf8_lossy(data);
    let (signal, known) = resolve_signal(&name);
    if !known {
        assert_eq!(signal, FALLBACK_SIGNAL);
    }
});
