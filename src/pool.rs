//! Bounded worker pool for async jobs
//!
//! A fixed number of workers pull jobs from one queue in submission order,
//! so at most `workers` jobs run at once. A panicking job fails only its own
//! result; the worker keeps going.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

type Job = BoxFuture<'static, ()>;

/// Worker pool errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Worker pool is shut down")]
    Closed,

    #[error("Job panicked or was dropped before completing")]
    TaskDropped,
}

pub struct WorkerPool {
    sender: Option<mpsc::UnboundedSender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `workers` workers (at least one)
    pub fn new(workers: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..workers.max(1))
            .map(|id| {
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    loop {
                        // Lock only while taking the next job
                        let job = receiver.lock().await.recv().await;
                        match job {
                            Some(job) => job.await,
                            None => break,
                        }
                    }
                    tracing::trace!(worker = id, "Worker stopped");
                })
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job; the receiver yields its output once it has run
    pub fn submit<F, T>(&self, job: F) -> Result<oneshot::Receiver<T>, PoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(PoolError::Closed)?;
        let (tx, rx) = oneshot::channel();

        let wrapped = async move {
            match AssertUnwindSafe(job).catch_unwind().await {
                Ok(output) => {
                    let _ = tx.send(output);
                }
                Err(_) => {
                    tracing::error!("Worker pool job panicked");
                }
            }
        };

        sender
            .send(wrapped.boxed())
            .map_err(|_| PoolError::Closed)?;

        Ok(rx)
    }

    /// Submit and wait for the result
    pub async fn run<F, T>(&self, job: F) -> Result<T, PoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(job)?.await.map_err(|_| PoolError::TaskDropped)
    }

    /// Stop accepting jobs and wait for queued ones to finish
    pub async fn join(mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                tracing::warn!("Worker task failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let receivers: Vec<_> = (0..12)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                pool.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .unwrap()
            })
            .collect();

        for rx in receivers {
            rx.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_single_worker_runs_in_order() {
        let pool = WorkerPool::new(1);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let receivers: Vec<_> = (0..5)
            .map(|i| {
                let order = order.clone();
                pool.submit(async move {
                    tokio::time::sleep(Duration::from_millis(5 - i as u64)).await;
                    order.lock().push(i);
                })
                .unwrap()
            })
            .collect();

        for rx in receivers {
            rx.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_results_are_returned() {
        let pool = WorkerPool::new(2);
        assert_eq!(pool.run(async { 21 * 2 }).await, Ok(42));
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new(1);

        let failed = pool.run(async { panic!("boom") }).await;
        assert_eq!(failed, Err::<(), _>(PoolError::TaskDropped));

        assert_eq!(pool.run(async { "still alive" }).await, Ok("still alive"));
    }

    #[tokio::test]
    async fn test_join_drains_queue() {
        let pool = WorkerPool::new(2);
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let done = done.clone();
            pool.submit(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.join().await;
        assert_eq!(done.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_zero_workers_means_one() {
        assert_eq!(WorkerPool::new(0).size(), 1);
    }
}
