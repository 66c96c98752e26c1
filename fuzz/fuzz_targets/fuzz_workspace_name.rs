//! Fuzz target: task id to workspace directory name.
//!
//! The name must always be a single, non-special path component.

#![no_main]

use libfuzzer_sys::fuzz_target;
use litegix_core::TaskId;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    let name = TaskId::new(raw).workspace_name();
    assert!(!name.contains('/'), "workspace name must not contain '/': {name:?}");
    assert!(!name.contains('\\'), "workspace name must not contain '\\': {name:?}");
    assert!(!name.is_empty() && name != "." && name != "..", "bad name {name:?}");
});
