//! Fan-out of task events to subscribers.

use litegix_core::TaskEvent;
use tokio::sync::broadcast;

/// Events buffered per subscriber before the slowest one starts lagging.
pub const EVENT_BUFFER: usize = 64;

/// Broadcasts [`TaskEvent`]s to every live subscriber.
#[derive(Debug, Clone)]
pub struct Eventer {
    tx: broadcast::Sender<TaskEvent>,
}

impl Eventer {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    /// Subscribe to events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Having no subscribers is not an error.
    pub fn emit(&self, event: TaskEvent) {
        tracing::debug!(task_id = %event.task_id, message = %event.message, "task event");
        if self.tx.send(event).is_err() {
            tracing::trace!("no event subscribers");
        }
    }
}

impl Default for Eventer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use litegix_core::TaskId;

    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_emitted_after_subscribing() {
        let eventer = Eventer::new();
        eventer.emit(TaskEvent::new(TaskId::new("t0"), "before"));

        let mut rx = eventer.subscribe();
        eventer.emit(TaskEvent::new(TaskId::new("t1"), "after").with_annotation("pid", "7"));

        let event = match rx.recv().await {
            Ok(e) => e,
            Err(e) => panic!("recv failed: {e}"),
        };
        assert_eq!(event.task_id, TaskId::new("t1"));
        assert_eq!(event.message, "after");
        assert_eq!(event.annotations.get("pid").map(String::as_str), Some("7"));
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        Eventer::new().emit(TaskEvent::new(TaskId::new("t1"), "lost"));
    }
}
