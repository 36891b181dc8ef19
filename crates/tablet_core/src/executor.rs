//! Background task executors used by parallel segment dumps.

use crate::error::{CoreError, CoreResult};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::thread::{self, JoinHandle};
use tracing::warn;

/// A unit of background work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks on background threads.
pub trait Executor: Send + Sync {
    /// Schedules `task` for execution.
    ///
    /// # Errors
    ///
    /// Returns an error if the executor no longer accepts work.
    fn schedule(&self, task: Task) -> CoreResult<()>;

    /// Number of tasks that can run at once.
    fn thread_count(&self) -> usize;
}

/// Fixed-size pool of worker threads fed by a channel.
///
/// Dropping the pool stops accepting work, lets queued tasks finish and
/// joins every worker.
pub struct ThreadPoolExecutor {
    sender: Mutex<Option<Sender<Task>>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPoolExecutor {
    /// Starts a pool with `thread_count` workers (at least one).
    ///
    /// # Errors
    ///
    /// Returns `Io` if a worker thread cannot be spawned.
    pub fn new(name: &str, thread_count: usize) -> CoreResult<Self> {
        let (sender, receiver) = unbounded::<Task>();
        let mut workers = Vec::with_capacity(thread_count.max(1));
        for i in 0..thread_count.max(1) {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || {
                    while let Ok(task) = receiver.recv() {
                        task();
                    }
                })?;
            workers.push(handle);
        }
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers,
        })
    }
}

impl Executor for ThreadPoolExecutor {
    fn schedule(&self, task: Task) -> CoreResult<()> {
        let guard = self.sender.lock();
        let sender = guard
            .as_ref()
            .ok_or_else(|| CoreError::internal("executor is shut down"))?;
        sender
            .send(task)
            .map_err(|_| CoreError::internal("executor workers are gone"))
    }

    fn thread_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        self.sender.lock().take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("executor worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for ThreadPoolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolExecutor")
            .field("threads", &self.workers.len())
            .finish()
    }
}

/// Runs every task on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn schedule(&self, task: Task) -> CoreResult<()> {
        task();
        Ok(())
    }

    fn thread_count(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn pool_runs_all_tasks_before_drop_returns() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPoolExecutor::new("test", 3).unwrap();
            assert_eq!(pool.thread_count(), 3);
            for _ in 0..50 {
                let counter = Arc::clone(&counter);
                pool.schedule(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn zero_threads_means_one() {
        let pool = ThreadPoolExecutor::new("test", 0).unwrap();
        assert_eq!(pool.thread_count(), 1);
    }

    #[test]
    fn inline_runs_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        InlineExecutor
            .schedule(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
