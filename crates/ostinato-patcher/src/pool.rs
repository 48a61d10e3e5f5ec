//! Worker pool for depth-parallel kernel evaluation.
//!
//! Nodes at the same graph depth have no edges between them, so they can
//! run concurrently; the evaluator enqueues one task per node and waits
//! for the depth to drain before moving on.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::debug;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct PoolShared {
    pending: Mutex<usize>,
    drained: Condvar,
}

pub struct WorkerPool {
    sender: Option<Sender<Task>>,
    shared: Arc<PoolShared>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(thread_count: usize) -> Self {
        let thread_count = thread_count.max(1);
        let (sender, receiver) = unbounded::<Task>();
        let shared = Arc::new(PoolShared {
            pending: Mutex::new(0),
            drained: Condvar::new(),
        });
        let workers = (0..thread_count)
            .map(|index| {
                let receiver = receiver.clone();
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("patcher-worker-{index}"))
                    .spawn(move || {
                        while let Ok(task) = receiver.recv() {
                            task();
                            let mut pending = shared.pending.lock();
                            *pending -= 1;
                            if *pending == 0 {
                                shared.drained.notify_all();
                            }
                        }
                    })
                    .expect("spawn patcher worker")
            })
            .collect();
        debug!(threads = thread_count, "patcher worker pool started");
        Self {
            sender: Some(sender),
            shared,
            workers,
        }
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    pub fn enqueue(&self, task: impl FnOnce() + Send + 'static) {
        {
            let mut pending = self.shared.pending.lock();
            *pending += 1;
        }
        if let Some(sender) = &self.sender {
            // Receivers live as long as the pool; send cannot fail.
            let _ = sender.send(Box::new(task));
        }
    }

    /// Block until every enqueued task has finished.
    pub fn wait(&self) {
        let mut pending = self.shared.pending.lock();
        while *pending > 0 {
            self.shared.drained.wait(&mut pending);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel ends the worker loops.
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_every_task() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn wait_on_empty_pool_returns() {
        let pool = WorkerPool::new(2);
        pool.wait();
    }

    #[test]
    fn waves_are_barriered() {
        let pool = WorkerPool::new(3);
        let counter = Arc::new(AtomicUsize::new(0));
        for wave in 0..5usize {
            for _ in 0..10 {
                let counter = Arc::clone(&counter);
                pool.enqueue(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
            pool.wait();
            assert_eq!(counter.load(Ordering::SeqCst), (wave + 1) * 10);
        }
    }

    #[test]
    fn zero_threads_rounds_up_to_one() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.thread_count(), 1);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        pool.enqueue(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
