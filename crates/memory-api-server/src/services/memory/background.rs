use parking_lot::Mutex;
use std::future::Future;
use tokio::task::JoinSet;
use tracing::debug;

/// Detached best-effort work (cache refills) that can still be awaited or
/// cancelled as a group.
#[derive(Default)]
pub struct BackgroundTasks {
    tasks: Mutex<JoinSet<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn onto the current runtime. Finished tasks are reaped first so the
    /// set does not grow without bound.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    /// Tasks spawned and not yet reaped
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Wait for every pending task to finish
    pub async fn wait(&self) {
        let mut pending = std::mem::take(&mut *self.tasks.lock());
        while pending.join_next().await.is_some() {}
    }

    /// Abort every pending task and wait for them to unwind
    pub async fn shutdown(&self) {
        let mut pending = std::mem::take(&mut *self.tasks.lock());
        if !pending.is_empty() {
            debug!("Cancelling {} background tasks", pending.len());
        }
        pending.shutdown().await;
    }
}
