//! Named background-task registry.
//!
//! Remote process starts are spawned as independent tasks; tracking them
//! by name lets shutdown join (or abort) every in-flight start
//! deterministically instead of leaking fire-and-forget futures.

use std::future::Future;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

/// Tracks named spawned tasks until a barrier joins them.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<Vec<(String, JoinHandle<anyhow::Result<()>>)>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn and track a named task.
    pub async fn spawn<F>(&self, name: impl Into<String>, future: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.lock().await.push((name.into(), handle));
    }

    /// Barrier: wait for every tracked task, returning per-task results.
    pub async fn join_all(&self) -> Vec<(String, anyhow::Result<()>)> {
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        let mut results = Vec::with_capacity(tasks.len());
        for (name, handle) in tasks {
            let result = match handle.await {
                Ok(inner) => inner,
                Err(join_err) => Err(anyhow::anyhow!("task {name} panicked: {join_err}")),
            };
            results.push((name, result));
        }
        results
    }

    /// Abort everything still in flight (shutdown path).
    pub async fn abort_all(&self) {
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for (name, handle) in tasks {
            if !handle.is_finished() {
                warn!(task = %name, "aborting in-flight task");
                handle.abort();
            }
        }
    }

    pub async fn pending(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_collects_results_by_name() {
        let registry = TaskRegistry::new();
        registry.spawn("ok", async { Ok(()) }).await;
        registry
            .spawn("fail", async { Err(anyhow::anyhow!("boom")) })
            .await;

        let results = registry.join_all().await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().find(|(n, _)| n == "ok").unwrap().1.is_ok());
        assert!(results.iter().find(|(n, _)| n == "fail").unwrap().1.is_err());
        assert_eq!(registry.pending().await, 0);
    }

    #[tokio::test]
    async fn abort_clears_pending() {
        let registry = TaskRegistry::new();
        registry
            .spawn("sleeper", async {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        assert_eq!(registry.pending().await, 1);
        registry.abort_all().await;
        assert_eq!(registry.pending().await, 0);
    }
}
