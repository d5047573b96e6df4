pub mod sync_sweeper;

use parking_lot::Mutex;
use std::future::Future;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Owns the background tasks and their shutdown signal.
///
/// Tasks only observe the signal between units of work, so `shutdown`
/// waits for them instead of letting the runtime drop them mid-operation.
pub struct BackgroundCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl BackgroundCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `task` with its own shutdown receiver and keep its handle.
    pub fn spawn<F, Fut>(&self, name: &'static str, task: F)
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task(self.shutdown_tx.subscribe()));
        self.tasks.lock().push((name, handle));
        tracing::debug!(task = name, "background task started");
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Signal every task to stop, then wait for each one to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for (name, handle) in tasks {
            match handle.await {
                Ok(()) => tracing::info!(task = name, "background task stopped"),
                Err(e) => tracing::error!(task = name, "background task failed: {}", e),
            }
        }
    }
}

impl Default for BackgroundCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_waits_for_task_to_finish_its_work() {
        let coord = BackgroundCoordinator::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        coord.spawn("slow", move |mut rx| async move {
            let _ = rx.recv().await;
            tokio::time::sleep(Duration::from_millis(30)).await;
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(coord.task_count(), 1);

        coord.shutdown().await;
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(coord.task_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_without_tasks_is_harmless() {
        let coord = BackgroundCoordinator::default();
        coord.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_block_shutdown() {
        let coord = BackgroundCoordinator::new();
        coord.spawn("broken", |_rx| async { panic!("boom") });
        coord.spawn("fine", |mut rx| async move {
            let _ = rx.recv().await;
        });
        coord.shutdown().await;
    }
}
