//! Integration tests for microVM lifecycle.
//!
//! These tests require KVM, the Firecracker binary, Docker and root (for
//! loop mounts). Point `LITEGIX_TEST_KERNEL` at an uncompressed vmlinux.
//! Run with: `cargo test --test firecracker_lifecycle -- --ignored`

use std::path::PathBuf;
use std::time::{Duration, Instant};

use litegix_core::{TaskId, TaskSpec};
use litegix_executor::{
    DockerMaterializer, FirecrackerHypervisor, ImageMaterializer, VmLifecycle, VmManager, VmState,
};

fn test_kernel() -> PathBuf {
    std::env::var_os("LITEGIX_TEST_KERNEL")
        .map_or_else(|| PathBuf::from("/var/lib/litegix/vmlinux"), PathBuf::from)
}

fn test_manager(base: PathBuf) -> VmManager<FirecrackerHypervisor, DockerMaterializer> {
    VmManager::new(
        FirecrackerHypervisor::default(),
        DockerMaterializer::default(),
        test_kernel(),
        base,
    )
}

#[tokio::test]
#[ignore = "requires Docker and root for loop mounts"]
async fn materialize_alpine_produces_ext4_image() {
    let dir = tempfile::tempdir().expect("tempdir");
    let rootfs = dir.path().join("rootfs.ext4");

    let info = DockerMaterializer::default()
        .materialize("alpine:3.20", &dir.path().join("image"), &rootfs)
        .await
        .expect("materialize failed");

    assert_eq!(info.path, rootfs);
    assert!(info.size_mib >= 100);
    let len = rootfs.metadata().expect("rootfs metadata").len();
    assert_eq!(len, info.size_mib * 1024 * 1024);
    assert!(
        !dir.path().join("image/export").exists(),
        "export scratch must be removed"
    );
}

#[tokio::test]
#[ignore = "requires KVM, Firecracker, Docker and root"]
async fn boot_probe_stop_destroy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = test_manager(dir.path().to_path_buf());
    let task_id = TaskId::new("lifecycle-test");

    let start = Instant::now();
    let record = manager
        .create_and_start(&TaskSpec::new("alpine:3.20", 1, 128), &task_id)
        .await
        .expect("create_and_start failed");
    println!("VM ready in {:?} with pid {}", start.elapsed(), record.pid);

    let status = manager.status(&record).await.expect("status failed");
    assert_eq!(status.state, VmState::Running);

    manager
        .stop(&record, Duration::from_secs(5))
        .await
        .expect("stop failed");
    let status = manager.status(&record).await.expect("status failed");
    assert_eq!(status.state, VmState::Stopped);

    manager.destroy(&record).await.expect("destroy failed");
    assert!(!record.workspace.exists(), "workspace must be removed");
}

#[tokio::test]
#[ignore = "requires Docker and root for loop mounts"]
async fn unknown_image_leaves_no_workspace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = test_manager(dir.path().to_path_buf());
    let task_id = TaskId::new("missing-image");

    let err = manager
        .create_and_start(
            &TaskSpec::new("litegix.invalid/does-not-exist:0", 1, 128),
            &task_id,
        )
        .await
        .expect_err("unknown image must fail");
    assert!(err.is_image_error(), "unexpected error: {err}");
    assert!(!dir.path().join("missing-image").exists());
}
