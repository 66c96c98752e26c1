//! Core types for the litegix Firecracker task driver.
//!
//! Defines the configuration schemas, the orchestrator-facing task types and
//! the plugin metadata shared by the executor, driver and gateway crates.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod error;
pub mod id;
pub mod plugin;
pub mod task;

pub use config::{DriverConfig, TaskSpec, KERNEL_CMDLINE};
pub use error::CoreError;
pub use id::TaskId;
pub use plugin::{
    Capabilities, CpuStats, Fingerprint, HealthState, MemoryStats, PluginInfo, TaskEvent,
    TaskResourceUsage, PLUGIN_NAME,
};
pub use task::{
    DriverHandle, ExitResult, TaskConfig, TaskState, TaskStateSnapshot, TaskStatus,
    TASK_HANDLE_VERSION,
};

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Utc;
    use serde_json::json;

    use super::*;

    fn kernel_in(dir: &tempfile::TempDir) -> PathBuf {
        let kernel = dir.path().join("vmlinux.bin");
        if let Err(e) = std::fs::write(&kernel, b"\x7fELF") {
            panic!("failed to write fake kernel: {e}");
        }
        kernel
    }

    #[test]
    fn driver_config_missing_kernel_is_config_invalid() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => panic!("tempdir: {e}"),
        };
        let config = DriverConfig::new(dir.path().join("nope/vmlinux"), dir.path().join("rootfs"));
        let result = config.validate();
        assert!(
            matches!(result, Err(CoreError::ConfigInvalid { field: "kernel_image_path", .. })),
            "missing kernel must be rejected, got {result:?}"
        );
        assert!(
            !dir.path().join("rootfs").exists(),
            "base directory must not be created for an invalid config"
        );
    }

    #[test]
    fn driver_config_validate_creates_base_directory() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => panic!("tempdir: {e}"),
        };
        let base = dir.path().join("a/b/rootfs");
        let config = DriverConfig::new(kernel_in(&dir), base.clone());
        assert!(config.validate().is_ok());
        assert!(base.is_dir(), "rootfs base directory must be created");
    }

    #[test]
    fn driver_config_accepts_legacy_field_names() {
        let doc = br#"{
            "vmlinux_path": "/var/lib/litegix/vmlinux",
            "rootfs_base_path": "/var/lib/litegix/tasks",
            "containerd_socket": "/run/containerd/containerd.sock"
        }"#;
        let config = match DriverConfig::from_json(doc) {
            Ok(c) => c,
            Err(e) => panic!("legacy names must decode: {e}"),
        };
        assert_eq!(config.kernel_image_path, PathBuf::from("/var/lib/litegix/vmlinux"));
        assert_eq!(config.rootfs_base_directory, PathBuf::from("/var/lib/litegix/tasks"));
        assert_eq!(config.firecracker_binary, PathBuf::from("firecracker"));
        assert_eq!(config.docker_binary, PathBuf::from("docker"));
    }

    #[test]
    fn driver_config_without_base_directory_fails_to_decode() {
        let result = DriverConfig::from_json(br#"{"kernel_image_path": "/k"}"#);
        assert!(matches!(result, Err(CoreError::ConfigInvalid { .. })));
    }

    #[test]
    fn task_spec_decodes_with_legacy_aliases() {
        let value = json!({
            "image": "alpine:latest",
            "vpu_count": 2,
            "mem_size": 256,
            "env": ["A=1", "B=two"]
        });
        let spec = match TaskSpec::decode(&value) {
            Ok(s) => s,
            Err(e) => panic!("decode failed: {e}"),
        };
        assert_eq!(spec.vcpu_count, 2);
        assert_eq!(spec.memory_mib, 256);
        assert_eq!(spec.env, vec!["A=1".to_owned(), "B=two".to_owned()]);
        assert!(spec.command.is_none());
    }

    #[test]
    fn task_spec_zero_vcpu_is_rejected() {
        let value = json!({"image": "alpine", "vcpu_count": 0, "memory_mib": 128});
        let result = TaskSpec::decode(&value);
        assert!(matches!(result, Err(CoreError::InvalidSpec { field: "vcpu_count", .. })));
    }

    #[test]
    fn task_spec_zero_memory_is_rejected() {
        let value = json!({"image": "alpine", "vcpu_count": 1, "memory_mib": 0});
        let result = TaskSpec::decode(&value);
        assert!(matches!(result, Err(CoreError::InvalidSpec { field: "memory_mib", .. })));
    }

    #[test]
    fn task_spec_missing_image_is_decode_error() {
        let value = json!({"vcpu_count": 1, "memory_mib": 128});
        assert!(matches!(TaskSpec::decode(&value), Err(CoreError::SpecDecode(_))));
    }

    #[test]
    fn task_spec_negative_vcpu_is_decode_error() {
        let value = json!({"image": "alpine", "vcpu_count": -1, "memory_mib": 128});
        assert!(matches!(TaskSpec::decode(&value), Err(CoreError::SpecDecode(_))));
    }

    #[test]
    fn task_spec_env_without_equals_is_rejected() {
        let value = json!({"image": "alpine", "vcpu_count": 1, "memory_mib": 128, "env": ["PATH"]});
        assert!(matches!(TaskSpec::decode(&value), Err(CoreError::InvalidSpec { field: "env", .. })));
    }

    #[test]
    fn snapshot_container_name_joins_task_name_and_alloc() {
        let config = TaskConfig::new("t1", "web", "alloc-42", json!({}));
        let snapshot = TaskStateSnapshot::new(config, Utc::now());
        assert_eq!(snapshot.container_name, "web-alloc-42");
    }

    #[test]
    fn driver_handle_carries_snapshot() {
        let config = TaskConfig::new("t1", "web", "alloc-42", json!({"image": "alpine"}));
        let mut handle = DriverHandle::new(config.clone());
        assert_eq!(handle.version, TASK_HANDLE_VERSION);

        let snapshot = TaskStateSnapshot::new(config, Utc::now());
        if let Err(e) = handle.set_driver_state(&snapshot) {
            panic!("set_driver_state failed: {e}");
        }
        let decoded: TaskStateSnapshot = match handle.driver_state() {
            Ok(s) => s,
            Err(e) => panic!("driver_state failed: {e}"),
        };
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn driver_handle_without_state_errors() {
        let handle = DriverHandle::new(TaskConfig::new("t1", "web", "a", json!({})));
        let result: Result<TaskStateSnapshot, _> = handle.driver_state();
        assert!(matches!(result, Err(CoreError::DriverState(_))));
    }

    #[test]
    fn task_id_workspace_name_escapes_separators() {
        assert_eq!(TaskId::new("alloc/web/abc").workspace_name(), "alloc%2Fweb%2Fabc");
        assert_eq!(TaskId::new("t1").workspace_name(), "t1");
        assert_eq!(TaskId::new("a\\b").workspace_name(), "a%5Cb");
        assert_eq!(TaskId::new("..").workspace_name(), "%2E%2E");
        assert_eq!(TaskId::new("").workspace_name(), "%");
    }

    #[test]
    fn distinct_task_ids_never_share_a_workspace() {
        let ids = [
            "alloc/web", "alloc_web", "alloc%2Fweb", "alloc\\web", "alloc%web",
            "", "%", ".", "..", "%2E", "_", "_.", "_..",
        ];
        let mut names = std::collections::HashSet::new();
        for id in ids {
            let name = TaskId::new(id).workspace_name();
            assert!(!name.contains('/') && !name.contains('\\'), "{id:?} -> {name:?}");
            assert!(name != "." && name != ".." && !name.is_empty(), "{id:?} -> {name:?}");
            assert!(names.insert(name.clone()), "{id:?} collides on {name:?}");
        }
    }

    #[test]
    fn task_state_terminal_states() {
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Exited.is_terminal());
        assert!(TaskState::Unknown.is_terminal());
    }

    #[test]
    fn default_exit_result_is_successful() {
        let result = ExitResult::default();
        assert!(result.successful());
        let failed = ExitResult {
            err: Some("probe timed out".to_owned()),
            ..ExitResult::default()
        };
        assert!(!failed.successful());
    }

    #[test]
    fn capabilities_advertise_signals_without_exec() {
        let caps = Capabilities::default();
        assert!(caps.send_signals);
        assert!(!caps.exec);
        assert_eq!(PluginInfo::default().name, "litegix-fc-driver");
    }
}
