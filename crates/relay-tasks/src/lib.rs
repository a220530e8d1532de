//! Background task registry.
//!
//! Detached units of work (one per streaming chat turn) are spawned here so
//! the HTTP-facing call can return immediately with an opaque task id. The
//! registry supports lookup-by-id cancellation and drops a finished task's
//! entry on its own — no periodic sweep needed.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

struct TaskEntry {
    token: CancellationToken,
}

/// Tracks long-running post-response coroutines as cancellable named units
/// of work. Cheap to share: clone wraps the same map.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<DashMap<String, TaskEntry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a detached task and return its id.
    ///
    /// The factory receives a [`CancellationToken`]; the task body is
    /// expected to observe it at suspension points and run its own cleanup
    /// path when cancelled — the registry never aborts a task outright.
    pub fn spawn<F, Fut>(&self, f: F) -> String
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task_id = Uuid::new_v4().to_string();
        let token = CancellationToken::new();

        // Register before spawning so a task that finishes instantly still
        // finds its own entry to remove.
        self.tasks
            .insert(task_id.clone(), TaskEntry { token: token.clone() });

        let fut = f(token);
        let tasks = Arc::clone(&self.tasks);
        let id = task_id.clone();
        tokio::spawn(async move {
            fut.await;
            tasks.remove(&id);
            debug!(task_id = %id, "background task finished");
        });

        task_id
    }

    /// Request cancellation of a running task. Returns false when the id is
    /// unknown (never existed, or already finished).
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.tasks.get(task_id) {
            Some(entry) => {
                entry.token.cancel();
                debug!(task_id, "background task cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn finished_task_removes_its_entry() {
        let registry = TaskRegistry::new();
        let (tx, rx) = oneshot::channel();

        let task_id = registry.spawn(|_token| async move {
            let _ = tx.send(());
        });
        rx.await.unwrap();

        // Entry removal runs right after the body; give the runtime a tick.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!registry.contains(&task_id));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn cancel_fires_the_token() {
        let registry = TaskRegistry::new();
        let (tx, rx) = oneshot::channel();

        let task_id = registry.spawn(|token| async move {
            token.cancelled().await;
            let _ = tx.send("cancelled");
        });

        assert!(registry.contains(&task_id));
        assert!(registry.cancel(&task_id));
        assert_eq!(rx.await.unwrap(), "cancelled");
    }

    #[tokio::test]
    async fn cancel_unknown_id_is_false() {
        let registry = TaskRegistry::new();
        assert!(!registry.cancel("nope"));
    }
}
