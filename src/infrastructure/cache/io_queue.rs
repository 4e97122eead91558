//! Serial background queue that owns the disk tier.
//!
//! Every disk operation of one cache instance runs on a single dedicated
//! thread, in submission order. Synchronous callers block until their job has
//! run; asynchronous callers await a reply.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::DiskCachePort;

type Job = Box<dyn FnOnce(&dyn DiskCachePort) + Send>;

/// Handle to the I/O thread. Dropping it lets the thread drain pending jobs and exit.
pub struct IoQueue {
    sender: mpsc::UnboundedSender<Job>,
    name: String,
}

impl IoQueue {
    /// Spawns the I/O thread, moving `disk` onto it.
    ///
    /// # Errors
    /// Returns error if the thread cannot be spawned.
    pub fn spawn(name: &str, disk: Box<dyn DiskCachePort>) -> CacheResult<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let thread_name = format!("picache-io-{name}");

        thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(|| job(disk.as_ref()))).is_err() {
                        error!("Disk cache job panicked");
                    }
                }
                debug!("IO queue drained, exiting");
            })
            .map_err(|e| CacheError::io("failed to spawn io thread", &e))?;

        Ok(Self {
            sender,
            name: thread_name,
        })
    }

    /// Returns the I/O thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues `job` without waiting for it.
    ///
    /// # Errors
    /// Returns error if the queue has shut down.
    pub fn dispatch<F>(&self, job: F) -> CacheResult<()>
    where
        F: FnOnce(&dyn DiskCachePort) + Send + 'static,
    {
        self.sender
            .send(Box::new(job))
            .map_err(|_| CacheError::QueueClosed)
    }

    /// Runs `job` on the queue and blocks the calling thread for its result.
    ///
    /// Must not be called from a job running on this same queue.
    ///
    /// # Errors
    /// Returns error if the queue has shut down or the job panicked.
    pub fn run_sync<F, R>(&self, job: F) -> CacheResult<R>
    where
        F: FnOnce(&dyn DiskCachePort) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        self.dispatch(move |disk| {
            let _ = tx.send(job(disk));
        })?;
        rx.recv().map_err(|_| CacheError::QueueClosed)
    }

    /// Runs `job` on the queue and awaits its result.
    ///
    /// # Errors
    /// Returns error if the queue has shut down or the job panicked.
    pub async fn run<F, R>(&self, job: F) -> CacheResult<R>
    where
        F: FnOnce(&dyn DiskCachePort) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.dispatch(move |disk| {
            let _ = tx.send(job(disk));
        })?;
        rx.await.map_err(|_| CacheError::QueueClosed)
    }
}

impl std::fmt::Debug for IoQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoQueue").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::CacheKey;
    use crate::infrastructure::cache::DiskCache;
    use crate::infrastructure::config::CacheConfig;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn queue() -> (IoQueue, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let disk = DiskCache::new(dir.path().to_path_buf(), &CacheConfig::default());
        (IoQueue::spawn("test", Box::new(disk)).unwrap(), dir)
    }

    #[test]
    fn test_run_sync_returns_job_result() {
        let (queue, _dir) = queue();
        let key = CacheKey::new("a").unwrap();
        let k = key.clone();
        queue.run_sync(move |disk| disk.set_data(&k, b"1")).unwrap().unwrap();
        assert!(queue.run_sync(move |disk| disk.contains_data(&key)).unwrap());
        assert!(queue.name().starts_with("picache-io-"));
    }

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let (queue, _dir) = queue();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut seen = Vec::new();

        for _ in 0..20 {
            let counter = counter.clone();
            queue
                .dispatch(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        for expected in 1..=3 {
            let counter = counter.clone();
            seen.push(
                queue
                    .run(move |_| counter.fetch_add(1, Ordering::SeqCst) + 1)
                    .await
                    .unwrap(),
            );
            assert_eq!(seen.last().copied(), Some(20 + expected));
        }
    }

    #[test]
    fn test_async_run_needs_no_runtime_thread() {
        let (queue, _dir) = queue();
        let count = tokio_test::block_on(queue.run(|disk| disk.total_count()));
        assert_eq!(count, Ok(0));
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stop_queue() {
        let (queue, _dir) = queue();
        let result = queue.run(|_| -> usize { panic!("boom") }).await;
        assert_eq!(result, Err(CacheError::QueueClosed));
        assert_eq!(queue.run(|_| 7).await, Ok(7));
    }
}
