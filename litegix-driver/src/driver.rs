//! The driver facade the orchestrator talks to.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use litegix_core::{
    Capabilities, DriverConfig, DriverHandle, ExitResult, Fingerprint, PluginInfo, TaskConfig,
    TaskEvent, TaskId, TaskResourceUsage, TaskStateSnapshot, TaskStatus, PLUGIN_NAME,
};
use litegix_executor::{process, FirecrackerVmManager, VmLifecycle};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;

use crate::eventer::Eventer;
use crate::handle::{run_monitor, TaskHandle};
use crate::registry::TaskStore;
use crate::DriverError;

/// Interval between fingerprint samples after the first.
pub const FINGERPRINT_INTERVAL: Duration = Duration::from_secs(30);

/// How often a waiter checks whether its task has finished.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Runs orchestrator tasks as Firecracker microVMs.
///
/// All operations take `&self` and may be called concurrently. Background
/// work (monitors, fingerprint, wait and stats streams) ends when
/// [`shutdown`](Self::shutdown) is called or the driver is dropped.
pub struct LitegixDriver {
    config: DriverConfig,
    vms: Arc<dyn VmLifecycle>,
    tasks: TaskStore,
    eventer: Eventer,
    shutdown_tx: watch::Sender<bool>,
}

impl LitegixDriver {
    /// Validate `config` and build a driver running Firecracker VMs.
    ///
    /// # Errors
    /// Returns [`DriverError::Config`] if the kernel image is missing or the
    /// rootfs base directory cannot be created.
    pub fn new(config: DriverConfig) -> Result<Self, DriverError> {
        config.validate().map_err(DriverError::Config)?;
        let vms = Arc::new(FirecrackerVmManager::from_config(&config));
        tracing::info!(
            kernel = %config.kernel_image_path.display(),
            rootfs_base = %config.rootfs_base_directory.display(),
            "driver configured"
        );
        Ok(Self::with_lifecycle(config, vms))
    }

    /// Build a driver over any [`VmLifecycle`]. `config` is not validated.
    #[must_use]
    pub fn with_lifecycle(config: DriverConfig, vms: Arc<dyn VmLifecycle>) -> Self {
        let (shutdown_tx, _rx) = watch::channel(false);
        Self {
            config,
            vms,
            tasks: TaskStore::new(),
            eventer: Eventer::new(),
            shutdown_tx,
        }
    }

    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    #[must_use]
    pub fn plugin_info(&self) -> PluginInfo {
        PluginInfo::default()
    }

    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Number of tasks currently registered.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// `true` once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Stream of fingerprints: one immediately, then every
    /// [`FINGERPRINT_INTERVAL`]. Ends on shutdown or when the receiver drops.
    #[must_use]
    pub fn fingerprint(&self) -> mpsc::Receiver<Fingerprint> {
        let (tx, rx) = mpsc::channel(1);
        let mut shutdown = self.shutdown_tx.subscribe();
        let kernel = self.config.kernel_image_path.display().to_string();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FINGERPRINT_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                if *shutdown.borrow() {
                    return;
                }
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        continue;
                    }
                    () = tx.closed() => return,
                }

                let mut fingerprint = Fingerprint::healthy();
                fingerprint
                    .attributes
                    .insert(format!("driver.{PLUGIN_NAME}"), "1".to_owned());
                fingerprint
                    .attributes
                    .insert(format!("driver.{PLUGIN_NAME}.kernel"), kernel.clone());
                if tx.send(fingerprint).await.is_err() {
                    return;
                }
            }
        });
        rx
    }

    /// Provision and boot a VM for `config`.
    ///
    /// The returned handle carries the snapshot the orchestrator must hand
    /// back to [`recover_task`](Self::recover_task).
    ///
    /// # Errors
    /// - [`DriverError::TaskAlreadyExists`] if the id is live or being started.
    /// - [`DriverError::Spec`] if the driver config does not decode.
    /// - [`DriverError::Executor`] if the VM cannot be provisioned.
    /// - [`DriverError::HandleState`] if the snapshot cannot be stored; the
    ///   VM is destroyed first.
    pub async fn start_task(&self, config: TaskConfig) -> Result<DriverHandle, DriverError> {
        let task_id = config.id.clone();
        let Some(reservation) = self.tasks.reserve(&task_id) else {
            return Err(DriverError::TaskAlreadyExists(task_id));
        };

        let spec = config.decode_driver_config().map_err(DriverError::Spec)?;
        tracing::info!(
            task_id = %task_id,
            image = %spec.image,
            vcpus = spec.vcpu_count,
            memory_mib = spec.memory_mib,
            "starting task"
        );

        let record = Arc::new(self.vms.create_and_start(&spec, &task_id).await?);
        let handle = TaskHandle::running(config.clone(), spec, Arc::clone(&record));

        let mut driver_handle = DriverHandle::new(config.clone());
        let snapshot = TaskStateSnapshot::new(config, handle.started_at);
        if let Err(e) = driver_handle.set_driver_state(&snapshot) {
            tracing::error!(task_id = %task_id, error = %e, "failed to store task snapshot");
            if let Err(destroy_err) = self.vms.destroy(&record).await {
                tracing::warn!(task_id = %task_id, error = %destroy_err, "cleanup destroy failed");
            }
            return Err(DriverError::HandleState(e));
        }

        let handle = Arc::new(handle);
        reservation.commit(Arc::clone(&handle));
        self.spawn_monitor(handle);
        self.eventer.emit(
            TaskEvent::new(task_id, "Task started")
                .with_annotation("pid", record.pid.to_string())
                .with_annotation("vm_id", record.vm_id.clone()),
        );
        Ok(driver_handle)
    }

    /// Re-register a task from its orchestrator handle after a driver restart.
    ///
    /// The VM cannot be reattached: the task is registered in the unknown
    /// state and its monitor completes it on the first probe.
    ///
    /// # Errors
    /// Returns [`DriverError::HandleState`] if the snapshot does not decode.
    pub fn recover_task(&self, handle: &DriverHandle) -> Result<(), DriverError> {
        if self.tasks.get(&handle.config.id).is_some() {
            return Ok(());
        }
        let snapshot: TaskStateSnapshot =
            handle.driver_state().map_err(DriverError::HandleState)?;
        let task_id = snapshot.task_config.id.clone();

        let Some(reservation) = self.tasks.reserve(&task_id) else {
            return Ok(());
        };
        let task = Arc::new(TaskHandle::recovered(snapshot));
        reservation.commit(Arc::clone(&task));
        self.spawn_monitor(task);
        tracing::info!(task_id = %task_id, "recovered task without VM");
        Ok(())
    }

    /// Receive the task's exit result once it has finished.
    ///
    /// The receiver closes without a value if the driver shuts down first.
    ///
    /// # Errors
    /// Returns [`DriverError::NotFound`] for unknown ids.
    pub fn wait_task(&self, id: &TaskId) -> Result<oneshot::Receiver<ExitResult>, DriverError> {
        let handle = self.lookup(id)?;
        let (mut tx, rx) = oneshot::channel();
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(WAIT_POLL_INTERVAL);
            loop {
                if *shutdown.borrow() {
                    return;
                }
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        continue;
                    }
                    () = tx.closed() => return,
                }

                let run = handle.run_state();
                if run.is_complete() {
                    let _ = tx.send(run.exit_result.unwrap_or_default());
                    return;
                }
            }
        });
        Ok(rx)
    }

    /// Stop the task's VM, gracefully within `timeout`.
    ///
    /// The task stays registered; its monitor records the exit.
    ///
    /// # Errors
    /// - [`DriverError::NotFound`] for unknown ids.
    /// - [`DriverError::NoVm`] for tasks without a VM.
    /// - [`DriverError::Stop`] if even the forced stop failed.
    pub async fn stop_task(
        &self,
        id: &TaskId,
        timeout: Duration,
        signal: &str,
    ) -> Result<(), DriverError> {
        let handle = self.lookup(id)?;
        let Some(record) = &handle.vm_record else {
            return Err(DriverError::NoVm(id.clone()));
        };
        tracing::info!(
            task_id = %id,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            signal,
            "stopping task"
        );
        self.vms
            .stop(record, timeout)
            .await
            .map_err(|source| DriverError::Stop {
                task_id: id.clone(),
                source,
            })
    }

    /// Tear the task down and forget it.
    ///
    /// Cleanup is best-effort: hypervisor and filesystem errors are logged.
    ///
    /// # Errors
    /// - [`DriverError::NotFound`] for unknown ids.
    /// - [`DriverError::StateViolation`] if the task is running and `force`
    ///   is false.
    pub async fn destroy_task(&self, id: &TaskId, force: bool) -> Result<(), DriverError> {
        let handle = self.lookup(id)?;
        if handle.is_running() && !force {
            return Err(DriverError::StateViolation(format!(
                "cannot destroy running task {id} without force"
            )));
        }

        let cleanup = match &handle.vm_record {
            Some(record) => self.vms.destroy(record).await,
            None => self.vms.remove_workspace(id).await,
        };
        if let Err(e) = cleanup {
            tracing::warn!(task_id = %id, error = %e, "task cleanup incomplete");
        }

        self.tasks.delete(id);
        tracing::info!(task_id = %id, force, "task destroyed");
        Ok(())
    }

    /// Current status of the task.
    ///
    /// # Errors
    /// Returns [`DriverError::NotFound`] for unknown ids.
    pub fn inspect_task(&self, id: &TaskId) -> Result<TaskStatus, DriverError> {
        Ok(self.lookup(id)?.status())
    }

    /// Resource usage samples every `interval`. Values are always zero.
    ///
    /// # Errors
    /// Returns [`DriverError::NotFound`] for unknown ids.
    pub fn task_stats(
        &self,
        id: &TaskId,
        interval: Duration,
    ) -> Result<mpsc::Receiver<TaskResourceUsage>, DriverError> {
        self.lookup(id)?;
        let period = if interval.is_zero() {
            WAIT_POLL_INTERVAL
        } else {
            interval
        };
        let (tx, rx) = mpsc::channel(1);
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                if *shutdown.borrow() {
                    return;
                }
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        continue;
                    }
                    () = tx.closed() => return,
                }
                if tx.send(TaskResourceUsage::zeroed(Utc::now())).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    /// Subscribe to task events.
    #[must_use]
    pub fn task_events(&self) -> broadcast::Receiver<TaskEvent> {
        self.eventer.subscribe()
    }

    /// Deliver a named signal to the task's VM process.
    ///
    /// Unknown names fall back to `SIGINT`.
    ///
    /// # Errors
    /// - [`DriverError::NotFound`] for unknown ids.
    /// - [`DriverError::NoVm`] for tasks without a VM.
    /// - [`DriverError::StateViolation`] once the task has finished.
    /// - [`DriverError::Executor`] if delivery fails.
    pub fn signal_task(&self, id: &TaskId, signal: &str) -> Result<(), DriverError> {
        let handle = self.lookup(id)?;
        let Some(record) = &handle.vm_record else {
            return Err(DriverError::NoVm(id.clone()));
        };
        // Once the VM has exited its PID may belong to another process.
        if !handle.is_running() {
            return Err(DriverError::StateViolation(format!(
                "cannot signal task {id}: it is no longer running"
            )));
        }

        let (resolved, known) = process::resolve_signal(signal);
        if !known {
            tracing::warn!(task_id = %id, requested = signal, fallback = %resolved, "unknown signal, sending fallback");
        }
        process::send_signal(record.pid, resolved)?;
        tracing::info!(task_id = %id, signal = %resolved, pid = record.pid, "signalled task");
        Ok(())
    }

    /// Run a command inside the task. Not supported.
    ///
    /// # Errors
    /// Always returns [`DriverError::Unsupported`].
    pub fn exec_task(
        &self,
        id: &TaskId,
        command: &[String],
        _timeout: Duration,
    ) -> Result<ExitResult, DriverError> {
        tracing::debug!(task_id = %id, argv = ?command, "exec requested");
        Err(DriverError::Unsupported("exec"))
    }

    /// Stop all background work started by this driver.
    ///
    /// Running VMs are left alone.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        tracing::info!("driver shutting down");
    }

    fn lookup(&self, id: &TaskId) -> Result<Arc<TaskHandle>, DriverError> {
        self.tasks
            .get(id)
            .ok_or_else(|| DriverError::NotFound(id.clone()))
    }

    fn spawn_monitor(&self, handle: Arc<TaskHandle>) {
        tokio::spawn(run_monitor(
            handle,
            Arc::clone(&self.vms),
            self.shutdown_tx.subscribe(),
            self.eventer.clone(),
        ));
    }
}

impl Drop for LitegixDriver {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}
