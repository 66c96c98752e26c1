//! Error types for the driver crate.

use litegix_core::{CoreError, TaskId};
use litegix_executor::ExecutorError;

/// Errors returned by [`LitegixDriver`](crate::LitegixDriver) operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DriverError {
    /// The driver configuration is invalid.
    #[error("invalid driver config: {0}")]
    Config(#[source] CoreError),

    /// A task with this id is already running or being started.
    #[error("task {0} already exists")]
    TaskAlreadyExists(TaskId),

    /// The task's driver config could not be decoded or failed validation.
    #[error("invalid task spec: {0}")]
    Spec(#[source] CoreError),

    /// The driver state on an orchestrator handle could not be written or read.
    #[error("task handle state: {0}")]
    HandleState(#[source] CoreError),

    /// Provisioning, probing or signalling the VM failed.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// No task with this id is known.
    #[error("task {0} not found")]
    NotFound(TaskId),

    /// The operation is not allowed in the task's current state.
    #[error("{0}")]
    StateViolation(String),

    /// The task has no VM to act on (for example, after recovery).
    #[error("task {0} has no running VM")]
    NoVm(TaskId),

    /// Cooperative shutdown failed and the forced stop failed too.
    #[error("failed to stop task {task_id}: {source}")]
    Stop {
        task_id: TaskId,
        #[source]
        source: ExecutorError,
    },

    /// The driver does not implement this operation.
    #[error("{0} is not supported by this driver")]
    Unsupported(&'static str),
}

impl DriverError {
    /// `true` for errors caused by the caller's input rather than the host.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::TaskAlreadyExists(_)
                | Self::Spec(_)
                | Self::HandleState(_)
                | Self::NotFound(_)
                | Self::StateViolation(_)
                | Self::NoVm(_)
                | Self::Unsupported(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_task() {
        let err = DriverError::NotFound(TaskId::new("web-1"));
        assert_eq!(err.to_string(), "task web-1 not found");
    }

    #[test]
    fn executor_errors_convert_and_are_not_client_errors() {
        let err: DriverError = ExecutorError::SpawnFailed("boom".to_owned()).into();
        assert!(matches!(err, DriverError::Executor(_)));
        assert!(!err.is_client_error());
    }

    #[test]
    fn spec_errors_are_client_errors() {
        let err = DriverError::Spec(CoreError::SpecDecode("missing field `image`".to_owned()));
        assert!(err.is_client_error());
        assert!(err.to_string().contains("image"));
    }
}
