//! Bounded worker-pool for callback dispatch (spec.md §4.11).
//!
//! Grounded nearly 1:1 on
//! `examples/original_source/src/IPC/octopus_ipc_threadpool.{hpp,cpp}`:
//! fixed initial worker count, a bounded FIFO task queue, one of three
//! overflow strategies chosen at construction, and a delayed-enqueue
//! variant that wraps the task in a sleep-then-run closure rather than
//! scheduling it out-of-band. The original's dynamic up/down-scaling
//! (`health_check`/`add_threads`/`remove_threads`) is a maintenance feature
//! no [MODULE] in the specification names, so it is not carried — this pool
//! always runs the worker count it was constructed with.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::warn;

type PoolTask = Box<dyn FnOnce() + Send + 'static>;

/// How the pool behaves when a task is submitted and the queue is already
/// at `max_queue_size` (spec.md §4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowStrategy {
    /// Evict the oldest queued task to make room for the new one.
    DropOldest,
    /// Discard the newly submitted task; the queue is left unchanged.
    DropNewest,
    /// Block the submitter, sleeping in small increments, until a slot
    /// frees up.
    Block,
}

/// How long [`OverflowStrategy::Block`] sleeps between capacity checks.
const BLOCK_POLL_INTERVAL: Duration = Duration::from_millis(1);

struct Shared {
    queue: Mutex<VecDeque<PoolTask>>,
    not_empty: Condvar,
    running: AtomicBool,
    max_queue_size: usize,
    strategy: OverflowStrategy,
}

/// Fixed-size worker pool with a bounded FIFO task queue.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawn `thread_count` workers draining a queue bounded to
    /// `max_queue_size` under `strategy`.
    pub fn new(thread_count: usize, max_queue_size: usize, strategy: OverflowStrategy) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            running: AtomicBool::new(true),
            max_queue_size,
            strategy,
        });

        let workers = (0..thread_count.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || worker_loop(shared))
            })
            .collect();

        Self { shared, workers }
    }

    /// Submit a task for asynchronous execution, applying the configured
    /// overflow strategy if the queue is already full.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        enqueue(&self.shared, Box::new(task));
    }

    /// Submit a task that runs after `delay_ms`. Modeled as a normal task
    /// that sleeps on a worker thread before running, matching the
    /// original's `enqueue_delayed` (spec.md §4.11 "delayed-enqueue
    /// variant").
    pub fn submit_delayed<F>(&self, task: F, delay_ms: u64)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(move || {
            thread::sleep(Duration::from_millis(delay_ms));
            task();
        });
    }

    /// Current queue length (never exceeds `max_queue_size` — spec.md §8
    /// testable property 6).
    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Configured worker count.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

fn enqueue(shared: &Arc<Shared>, task: PoolTask) {
    let mut queue = shared.queue.lock();

    match shared.strategy {
        OverflowStrategy::DropOldest => {
            if queue.len() >= shared.max_queue_size {
                warn!("thread pool queue full, dropping oldest task");
                queue.pop_front();
            }
            queue.push_back(task);
        }
        OverflowStrategy::DropNewest => {
            if queue.len() >= shared.max_queue_size {
                warn!("thread pool queue full, dropping newest task");
                return;
            }
            queue.push_back(task);
        }
        OverflowStrategy::Block => {
            while queue.len() >= shared.max_queue_size {
                parking_lot::MutexGuard::unlocked(&mut queue, || {
                    thread::sleep(BLOCK_POLL_INTERVAL);
                });
            }
            queue.push_back(task);
        }
    }

    drop(queue);
    shared.not_empty.notify_one();
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    break Some(task);
                }
                if !shared.running.load(Ordering::Acquire) {
                    break None;
                }
                shared.not_empty.wait(&mut queue);
            }
        };

        match task {
            Some(task) => task(),
            None => return,
        }
    }
}

impl Drop for ThreadPool {
    /// Signal every worker and join them. In-flight tasks run to
    /// completion; queued tasks are not guaranteed to run (spec.md §4.11
    /// "Shutdown").
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.not_empty.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
