//! End-to-end driver scenarios against real Firecracker microVMs.
//!
//! These tests require KVM, Firecracker, Docker and root. Point
//! `LITEGIX_TEST_KERNEL` at an uncompressed vmlinux.
//! Run with: `cargo test --test driver_lifecycle -- --ignored`

use std::path::PathBuf;
use std::time::Duration;

use litegix_core::{DriverConfig, TaskConfig, TaskId, TaskState};
use litegix_driver::{DriverError, LitegixDriver};
use serde_json::json;

fn test_driver(base: PathBuf) -> LitegixDriver {
    let kernel = std::env::var_os("LITEGIX_TEST_KERNEL")
        .map_or_else(|| PathBuf::from("/var/lib/litegix/vmlinux"), PathBuf::from);
    LitegixDriver::new(DriverConfig::new(kernel, base)).expect("driver config invalid")
}

fn alpine(id: &str) -> TaskConfig {
    TaskConfig::new(
        id,
        "web",
        "alloc-e2e",
        json!({"image": "alpine:3.20", "vcpu_count": 1, "memory_mib": 128}),
    )
}

#[tokio::test]
#[ignore = "requires KVM, Firecracker, Docker and root"]
async fn start_stop_wait_destroy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let driver = test_driver(dir.path().to_path_buf());
    let id = TaskId::new("t1");

    driver.start_task(alpine("t1")).await.expect("start failed");
    assert!(dir.path().join("t1/rootfs.ext4").exists());
    let status = driver.inspect_task(&id).expect("inspect failed");
    assert_eq!(status.state, TaskState::Running);
    assert!(status.driver_attributes.contains_key("pid"));

    let waiter = driver.wait_task(&id).expect("wait failed");
    driver
        .stop_task(&id, Duration::from_secs(5), "SIGTERM")
        .await
        .expect("stop failed");

    let exit = tokio::time::timeout(Duration::from_secs(15), waiter)
        .await
        .expect("wait timed out")
        .expect("waiter closed");
    println!("exit result: {exit:?}");
    assert_eq!(
        driver.inspect_task(&id).expect("inspect failed").state,
        TaskState::Exited
    );

    driver.destroy_task(&id, false).await.expect("destroy failed");
    assert!(!dir.path().join("t1").exists(), "workspace must be removed");
}

#[tokio::test]
#[ignore = "requires KVM, Firecracker, Docker and root"]
async fn forced_destroy_of_running_task() {
    let dir = tempfile::tempdir().expect("tempdir");
    let driver = test_driver(dir.path().to_path_buf());
    let id = TaskId::new("t2");

    driver.start_task(alpine("t2")).await.expect("start failed");
    assert!(matches!(
        driver.destroy_task(&id, false).await,
        Err(DriverError::StateViolation(_))
    ));
    driver.destroy_task(&id, true).await.expect("forced destroy failed");
    assert!(matches!(
        driver.inspect_task(&id),
        Err(DriverError::NotFound(_))
    ));
}

#[tokio::test]
#[ignore = "requires KVM, Firecracker, Docker and root"]
async fn failed_image_leaves_no_workspace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let driver = test_driver(dir.path().to_path_buf());
    let config = TaskConfig::new(
        "t4",
        "web",
        "alloc-e2e",
        json!({"image": "litegix.invalid/missing:0", "vcpu_count": 1, "memory_mib": 128}),
    );

    let err = driver.start_task(config).await.expect_err("start must fail");
    assert!(matches!(err, DriverError::Executor(ref e) if e.is_image_error()), "unexpected: {err}");
    assert!(!dir.path().join("t4").exists());
}
