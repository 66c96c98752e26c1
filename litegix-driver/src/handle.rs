//! Per-task handle and the monitor that tracks its VM.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use litegix_core::{
    ExitResult, TaskConfig, TaskEvent, TaskSpec, TaskState, TaskStateSnapshot, TaskStatus,
};
use litegix_executor::{VmLifecycle, VmRecord, VmState};
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::eventer::Eventer;

/// How often the monitor probes the VM.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(5);

/// Deadline for a single VM probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Run state of a task, read and written as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct RunState {
    pub proc_state: TaskState,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_result: Option<ExitResult>,
}

impl RunState {
    /// `true` once the monitor has recorded a terminal state.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.proc_state.is_terminal() && self.completed_at.is_some()
    }
}

/// Everything the driver knows about one task.
#[derive(Debug)]
pub struct TaskHandle {
    pub config: TaskConfig,
    /// Decoded spec; absent for recovered tasks whose config no longer decodes.
    pub spec: Option<TaskSpec>,
    pub started_at: DateTime<Utc>,
    /// The task's VM. Recovered tasks have none.
    pub vm_record: Option<Arc<VmRecord>>,
    run: RwLock<RunState>,
}

impl TaskHandle {
    /// Handle for a freshly booted VM.
    #[must_use]
    pub fn running(config: TaskConfig, spec: TaskSpec, record: Arc<VmRecord>) -> Self {
        Self {
            config,
            spec: Some(spec),
            started_at: record.created_at,
            vm_record: Some(record),
            run: RwLock::new(RunState {
                proc_state: TaskState::Running,
                completed_at: None,
                exit_result: None,
            }),
        }
    }

    /// Handle rebuilt from a persisted snapshot. It has no VM and starts in
    /// [`TaskState::Unknown`]; its monitor completes it on the first probe.
    #[must_use]
    pub fn recovered(snapshot: TaskStateSnapshot) -> Self {
        let spec = snapshot.task_config.decode_driver_config().ok();
        Self {
            config: snapshot.task_config,
            spec,
            started_at: snapshot.started_at,
            vm_record: None,
            run: RwLock::new(RunState {
                proc_state: TaskState::Unknown,
                completed_at: None,
                exit_result: None,
            }),
        }
    }

    /// A consistent copy of the run state.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    #[must_use]
    pub fn run_state(&self) -> RunState {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.run.read().expect("task run state lock poisoned").clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.run_state().proc_state == TaskState::Running
    }

    /// Point-in-time status for inspection.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        let run = self.run_state();
        let mut attributes = BTreeMap::new();
        if let Some(record) = &self.vm_record {
            attributes.insert("pid".to_owned(), record.pid.to_string());
            attributes.insert("vm_id".to_owned(), record.vm_id.clone());
        }
        TaskStatus::new(
            self.config.id.clone(),
            self.config.name.clone(),
            run.proc_state,
            self.started_at,
            run.completed_at,
            run.exit_result,
            attributes,
        )
    }

    fn complete(&self, state: TaskState, completed_at: DateTime<Utc>, exit: ExitResult) {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut run = self.run.write().expect("task run state lock poisoned");
        run.proc_state = state;
        run.completed_at = Some(completed_at);
        run.exit_result = Some(exit);
    }
}

enum Probe {
    Running,
    Done(TaskEvent),
}

async fn probe(handle: &TaskHandle, vms: &dyn VmLifecycle) -> Probe {
    let task_id = handle.config.id.clone();
    let Some(record) = &handle.vm_record else {
        handle.complete(TaskState::Unknown, Utc::now(), ExitResult::default());
        return Probe::Done(TaskEvent::new(task_id, "Task state unknown: no VM attached"));
    };

    match tokio::time::timeout(PROBE_TIMEOUT, vms.status(record)).await {
        Ok(Ok(status)) => match status.state {
            VmState::Running => Probe::Running,
            VmState::Stopped => {
                let mut exit = ExitResult::default();
                exit.exit_code = status.exit_code.unwrap_or_default();
                exit.signal = status.exit_signal.unwrap_or_default();
                let code = exit.exit_code;
                handle.complete(
                    TaskState::Exited,
                    status.exited_at.unwrap_or_else(Utc::now),
                    exit,
                );
                tracing::info!(task_id = %task_id, exit_code = code, "task exited");
                Probe::Done(
                    TaskEvent::new(task_id, "Task exited")
                        .with_annotation("exit_code", code.to_string()),
                )
            }
            _ => {
                handle.complete(TaskState::Unknown, Utc::now(), ExitResult::default());
                tracing::warn!(task_id = %task_id, "task state unknown");
                Probe::Done(TaskEvent::new(task_id, "Task state unknown"))
            }
        },
        Ok(Err(e)) => {
            tracing::error!(task_id = %task_id, error = %e, "VM status probe failed");
            let mut exit = ExitResult::default();
            exit.err = Some(e.to_string());
            handle.complete(TaskState::Unknown, Utc::now(), exit);
            Probe::Done(
                TaskEvent::new(task_id, "Task state unknown: probe failed")
                    .with_annotation("error", e.to_string()),
            )
        }
        Err(_) => {
            tracing::warn!(task_id = %task_id, "VM status probe timed out");
            handle.complete(TaskState::Unknown, Utc::now(), ExitResult::default());
            Probe::Done(TaskEvent::new(task_id, "Task state unknown: probe timed out"))
        }
    }
}

/// Track `handle`'s VM until it leaves the running state or the driver shuts
/// down. The first probe happens one [`MONITOR_INTERVAL`] after the call.
pub(crate) async fn run_monitor(
    handle: Arc<TaskHandle>,
    vms: Arc<dyn VmLifecycle>,
    mut shutdown: watch::Receiver<bool>,
    eventer: Eventer,
) {
    let mut ticker = interval_at(Instant::now() + MONITOR_INTERVAL, MONITOR_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            tracing::debug!(task_id = %handle.config.id, "monitor stopped by driver shutdown");
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
        }

        match probe(&handle, vms.as_ref()).await {
            Probe::Running => {}
            Probe::Done(event) => {
                eventer.emit(event);
                return;
            }
        }
    }
}
