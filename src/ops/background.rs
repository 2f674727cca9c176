use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

/// Runner for fire-and-forget side effects (activity records, error logs).
///
/// Tasks are launched on the current tokio runtime and never awaited for
/// the outcome of the operation that launched them. A task's failure is
/// logged with its label and goes nowhere else.
#[derive(Debug, Clone, Default)]
pub struct BestEffort {
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BestEffort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch `fut`. Must be called from within a tokio runtime.
    pub fn spawn<F, T, E>(&self, label: impl Into<String>, fut: F)
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let label = label.into();
        let handle = tokio::spawn(async move {
            match fut.await {
                Ok(_) => tracing::debug!(task = %label, "background task done"),
                Err(e) => tracing::warn!(task = %label, error = %e, "background task failed"),
            }
        });
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|h| !h.is_finished());
            tasks.push(handle);
        }
    }

    /// Number of launched tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        self.tasks
            .lock()
            .map(|t| t.iter().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }

    /// Wait for everything launched so far. Used at shutdown so a CLI
    /// process doesn't exit with writes still queued.
    pub async fn drain(&self) {
        let handles: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => return,
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background task panicked or was cancelled");
            }
        }
    }
}
