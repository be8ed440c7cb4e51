//! Bounded worker pool shared by page OCR and async job execution.
//!
//! Two ways in:
//!
//! * [`WorkerPool::map_ordered`] drives a batch of futures with at most
//!   `size` in flight (`buffer_unordered`) and returns results in input
//!   order, whatever order they completed in.
//! * [`WorkerPool::spawn`] detaches a task that waits for a permit first,
//!   for fire-and-forget work such as background jobs.

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 32;

/// Clamp a requested worker count into `MIN_WORKERS..=MAX_WORKERS`.
pub fn clamp_workers(requested: usize) -> usize {
    requested.clamp(MIN_WORKERS, MAX_WORKERS)
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    size: usize,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = clamp_workers(size);
        Self {
            size,
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `f` over `items` with bounded concurrency, preserving input order.
    pub async fn map_ordered<T, R, F, Fut>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = R>,
    {
        let mut indexed: Vec<(usize, R)> = stream::iter(items.into_iter().enumerate().map(|(i, item)| {
            let fut = f(item);
            async move { (i, fut.await) }
        }))
        .buffer_unordered(self.size)
        .collect()
        .await;
        indexed.sort_by_key(|(i, _)| *i);
        indexed.into_iter().map(|(_, r)| r).collect()
    }

    /// Spawn a task that runs once a permit is free.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            // a closed semaphore only happens on shutdown; run unthrottled then
            let _permit = permits.acquire_owned().await.ok();
            fut.await
        })
    }

    /// Permits not currently held by spawned tasks.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn size_is_clamped() {
        assert_eq!(WorkerPool::new(0).size(), 1);
        assert_eq!(WorkerPool::new(8).size(), 8);
        assert_eq!(WorkerPool::new(500).size(), 32);
    }

    #[tokio::test]
    async fn map_ordered_restores_input_order() {
        let pool = WorkerPool::new(4);
        let out = pool
            .map_ordered(vec![40u64, 10, 30, 0, 20], |delay| async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                delay
            })
            .await;
        assert_eq!(out, vec![40, 10, 30, 0, 20]);
    }

    #[test]
    fn map_ordered_of_nothing_is_empty() {
        let pool = WorkerPool::new(4);
        let out: Vec<u8> = tokio_test::block_on(pool.map_ordered(Vec::<u8>::new(), |x| async move { x }));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn map_ordered_respects_bound() {
        let pool = WorkerPool::new(2);
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        pool.map_ordered((0..8).collect::<Vec<_>>(), |_| {
            let live = Arc::clone(&live);
            let peak = Arc::clone(&peak);
            async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                live.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn spawn_runs_under_permit() {
        let pool = WorkerPool::new(1);
        let a = pool.spawn(async { 1 });
        let b = pool.spawn(async { 2 });
        assert_eq!(a.await.unwrap() + b.await.unwrap(), 3);
        assert_eq!(pool.available(), 1);
    }
}
