//! Fire-and-forget task spawning with a join point for tests
//!
//! Failures and panics are caught at the task boundary and logged; they never
//! reach the request that triggered the task.

use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Default)]
struct TaskCounters {
    spawned: AtomicU64,
    failed: AtomicU64,
}

#[derive(Clone, Default)]
pub struct BackgroundTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    counters: Arc<TaskCounters>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` detached. Returns false if no tokio runtime is available.
    pub fn spawn<F>(&self, label: String, task: F) -> bool
    where
        F: Future<Output = Result<(), String>> + Send + 'static,
    {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!(task = %label, "No async runtime; background task dropped");
                return false;
            }
        };

        let counters = Arc::clone(&self.counters);
        counters.spawned.fetch_add(1, Ordering::Relaxed);

        let handle = runtime.spawn(async move {
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => {
                    tracing::debug!(task = %label, "Background task completed");
                }
                Ok(Err(error)) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(task = %label, error = %error, "Background task failed");
                }
                Err(_) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(task = %label, "Background task panicked");
                }
            }
        });

        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
        true
    }

    /// Wait until every spawned task, including ones spawned meanwhile, is done
    pub async fn wait_idle(&self) {
        loop {
            let pending = std::mem::take(&mut *self.handles.lock());
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                let _ = handle.await;
            }
        }
    }

    pub fn spawned(&self) -> u64 {
        self.counters.spawned.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }
}
