//! Bounded fan-out of keyed tasks

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};

/// A set of spawned tasks with at most `limit` running at once
///
/// Each task carries a key so results (and panics) can be attributed to
/// the unit of work that produced them.
pub struct BoundedTasks<K, T> {
    set: JoinSet<T>,
    keys: HashMap<Id, K>,
    permits: Arc<Semaphore>,
}

impl<K, T> BoundedTasks<K, T>
where
    T: Send + 'static,
{
    pub fn new(limit: usize) -> Self {
        Self {
            set: JoinSet::new(),
            keys: HashMap::new(),
            permits: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    /// Spawn a task; it starts working once a slot frees up
    pub fn spawn<F>(&mut self, key: K, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let handle = self.set.spawn(async move {
            let _permit = permits.acquire_owned().await;
            task.await
        });
        self.keys.insert(handle.id(), key);
    }

    /// Wait for the next task to finish
    ///
    /// Returns `None` once every task has been joined.
    pub async fn join_next(&mut self) -> Option<(K, Result<T, JoinError>)> {
        loop {
            let (id, result) = match self.set.join_next_with_id().await? {
                Ok((id, value)) => (id, Ok(value)),
                Err(e) => (e.id(), Err(e)),
            };
            if let Some(key) = self.keys.remove(&id) {
                return Some((key, result));
            }
        }
    }

    /// Abort every outstanding task and wait for them to stop
    pub async fn shutdown(&mut self) {
        self.set.shutdown().await;
        self.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_limit_is_respected() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tasks = BoundedTasks::new(3);

        for i in 0..12 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            tasks.spawn(i, async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                i * 2
            });
        }

        let mut results = Vec::new();
        while let Some((key, result)) = tasks.join_next().await {
            assert_eq!(result.unwrap(), key * 2);
            results.push(key);
        }

        results.sort();
        assert_eq!(results, (0..12).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_panic_is_attributed_to_key() {
        let mut tasks: BoundedTasks<&str, ()> = BoundedTasks::new(2);
        tasks.spawn("ok", async {});
        tasks.spawn("boom", async { panic!("task exploded") });

        let mut failed = Vec::new();
        while let Some((key, result)) = tasks.join_next().await {
            if result.is_err() {
                failed.push(key);
            }
        }
        assert_eq!(failed, vec!["boom"]);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_pending() {
        let mut tasks = BoundedTasks::new(1);
        for i in 0..5 {
            tasks.spawn(i, async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                i
            });
        }
        assert_eq!(tasks.len(), 5);
        tasks.shutdown().await;
        assert!(tasks.is_empty());
        assert!(tasks.join_next().await.is_none());
    }
}
