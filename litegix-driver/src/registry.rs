//! In-memory task registry.
//!
//! Maps task ids to their handles. Ids that are being started are held by a
//! [`Reservation`] so a second start of the same id is rejected while the
//! first one is still provisioning its VM.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use litegix_core::TaskId;

use crate::handle::TaskHandle;

#[derive(Debug, Default)]
struct Inner {
    tasks: HashMap<TaskId, Arc<TaskHandle>>,
    pending: HashSet<TaskId>,
}

/// Thread-safe registry of live task handles.
#[derive(Debug, Default)]
pub struct TaskStore {
    inner: Mutex<Inner>,
}

impl TaskStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a task.
    ///
    /// # Panics
    /// Panics if the internal `Mutex` is poisoned.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<Arc<TaskHandle>> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.inner
            .lock()
            .expect("task store lock poisoned")
            .tasks
            .get(id)
            .cloned()
    }

    /// Insert or replace a task.
    ///
    /// # Panics
    /// Panics if the internal `Mutex` is poisoned.
    pub fn set(&self, id: TaskId, handle: Arc<TaskHandle>) {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut inner = self.inner.lock().expect("task store lock poisoned");
        inner.pending.remove(&id);
        inner.tasks.insert(id, handle);
    }

    /// Remove a task. Returns the handle if it existed.
    ///
    /// # Panics
    /// Panics if the internal `Mutex` is poisoned.
    pub fn delete(&self, id: &TaskId) -> Option<Arc<TaskHandle>> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.inner
            .lock()
            .expect("task store lock poisoned")
            .tasks
            .remove(id)
    }

    /// Number of registered tasks, not counting reservations.
    ///
    /// # Panics
    /// Panics if the internal `Mutex` is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.inner
            .lock()
            .expect("task store lock poisoned")
            .tasks
            .len()
    }

    /// `true` if no task is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim `id` for a task about to be started.
    ///
    /// Returns `None` if the id is registered or already reserved. The claim
    /// is released when the reservation drops without being committed.
    ///
    /// # Panics
    /// Panics if the internal `Mutex` is poisoned.
    #[must_use]
    pub fn reserve(&self, id: &TaskId) -> Option<Reservation<'_>> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut inner = self.inner.lock().expect("task store lock poisoned");
        if inner.tasks.contains_key(id) || !inner.pending.insert(id.clone()) {
            return None;
        }
        Some(Reservation {
            store: self,
            id: id.clone(),
            committed: false,
        })
    }

    fn release(&self, id: &TaskId) {
        // A poisoned lock here would panic inside Drop; leave the id reserved instead.
        if let Ok(mut inner) = self.inner.lock() {
            inner.pending.remove(id);
        }
    }
}

/// A claim on a task id, held while the task's VM is provisioned.
#[derive(Debug)]
#[must_use = "dropping a reservation releases the task id"]
pub struct Reservation<'a> {
    store: &'a TaskStore,
    id: TaskId,
    committed: bool,
}

impl Reservation<'_> {
    /// The reserved id.
    #[must_use]
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Register `handle` under the reserved id.
    pub fn commit(mut self, handle: Arc<TaskHandle>) {
        self.store.set(self.id.clone(), handle);
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.store.release(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use litegix_core::{TaskConfig, TaskStateSnapshot};
    use serde_json::json;

    use super::*;

    fn recovered(id: &str) -> Arc<TaskHandle> {
        let config = TaskConfig::new(id, "web", "alloc-1", json!({}));
        Arc::new(TaskHandle::recovered(TaskStateSnapshot::new(config, Utc::now())))
    }

    #[test]
    fn set_get_delete_lifecycle() {
        let store = TaskStore::new();
        let id = TaskId::new("t1");
        assert!(store.is_empty());

        store.set(id.clone(), recovered("t1"));
        assert_eq!(store.len(), 1);
        assert!(store.get(&id).is_some(), "task should exist after set");

        assert!(store.delete(&id).is_some(), "delete should return the handle");
        assert!(store.get(&id).is_none(), "task should be gone after delete");
        assert!(store.delete(&id).is_none(), "second delete finds nothing");
    }

    #[test]
    fn reservation_blocks_second_claim_until_dropped() {
        let store = TaskStore::new();
        let id = TaskId::new("t1");

        let first = store.reserve(&id);
        assert!(first.is_some());
        assert!(store.reserve(&id).is_none(), "pending id must not be claimable twice");
        assert_eq!(store.len(), 0, "reservations are not tasks");

        drop(first);
        assert!(store.reserve(&id).is_some(), "dropped reservation must release the id");
    }

    #[test]
    fn committed_reservation_registers_task() {
        let store = TaskStore::new();
        let id = TaskId::new("t1");

        let Some(reservation) = store.reserve(&id) else {
            panic!("fresh id must be reservable");
        };
        assert_eq!(reservation.id(), &id);
        reservation.commit(recovered("t1"));

        assert!(store.get(&id).is_some());
        assert!(store.reserve(&id).is_none(), "registered id must not be reservable");

        store.delete(&id);
        assert!(store.reserve(&id).is_some(), "deleted id becomes reservable again");
    }
}
