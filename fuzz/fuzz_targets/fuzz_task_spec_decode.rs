//! Fuzz target: decoding a task spec from arbitrary JSON.
//!
//! Any spec that decodes must satisfy the acceptance invariants.

#![no_main]

use libfuzzer_sys::fuzz_target;
use litegix_core::TaskSpec;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    if let Ok(spec) = TaskSpec::decode(&value) {
        assert!(spec.vcpu_count > 0, "accepted spec must have vCPUs");
        assert!(spec.memory_mib > 0, "accepted spec must have memory");
        assert!(!spec.image.trim().is_empty(), "accepted spec must name an image");
        assert!(spec.env.iter().all(|e| e.contains('=')), "env entries must be KEY=VALUE");
    }
});
