//! Fixed-size worker pool over one shared FIFO queue.

use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, trace, warn};

use super::stats::{PoolCounters, PoolStats};
use super::task::{Task, TaskId};
use super::PoolError;
use crate::config::PoolConfig;
use crate::lifecycle::Lifecycle;

/// Notified once when the pool begins shutting down, before the workers
/// are woken and joined.
///
/// The pool only holds a `Weak` to each hook; hooks whose owner is gone are
/// skipped and pruned.
pub(crate) trait ShutdownHook: Send + Sync {
    fn on_pool_shutdown(&self);
}

/// A fixed set of worker threads competing for tasks on one queue.
///
/// Tasks pop in FIFO order; completion order across workers is not
/// specified. Shutting down stops intake, lets the workers drain whatever
/// was queued before the stop request, then joins every thread.
///
/// ## Example
///
/// ```
/// use pooled_bus::WorkerPool;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let pool = WorkerPool::new(4).unwrap();
/// let counter = Arc::new(AtomicUsize::new(0));
///
/// for _ in 0..100 {
///     let counter = Arc::clone(&counter);
///     pool.enqueue(move || {
///         counter.fetch_add(1, Ordering::SeqCst);
///     })
///     .unwrap();
/// }
///
/// let stats = pool.shutdown();
/// assert_eq!(counter.load(Ordering::SeqCst), 100);
/// assert_eq!(stats.completed, 100);
/// ```
pub struct WorkerPool {
    name: String,
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

struct PoolShared {
    queue: Mutex<PoolQueue>,
    /// Signalled when a task arrives or the pool starts stopping.
    available: Condvar,
    /// Signalled when the queue is empty and no task is running.
    idle: Condvar,
    counters: PoolCounters,
    size: usize,
}

struct PoolQueue {
    tasks: VecDeque<Task>,
    state: Lifecycle,
    active: usize,
    next_id: u64,
    hooks: Vec<Weak<dyn ShutdownHook>>,
    /// Set when the pool was stopped from one of its own workers; that
    /// worker marks the pool `Stopped` once it exits.
    detached: bool,
}

impl PoolQueue {
    fn is_idle(&self) -> bool {
        self.tasks.is_empty() && self.active == 0
    }
}

impl WorkerPool {
    /// Start a pool with `workers` threads and the default thread name.
    pub fn new(workers: usize) -> Result<Self, PoolError> {
        Self::with_config(PoolConfig::new(workers))
    }

    /// Start a pool from a config.
    ///
    /// If a worker thread fails to spawn, the workers already started are
    /// stopped and joined before the error is returned.
    pub fn with_config(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let shared = Arc::new(PoolShared {
            queue: Mutex::new(PoolQueue {
                tasks: VecDeque::new(),
                state: Lifecycle::Running,
                active: 0,
                next_id: 0,
                hooks: Vec::new(),
                detached: false,
            }),
            available: Condvar::new(),
            idle: Condvar::new(),
            counters: PoolCounters::default(),
            size: config.workers,
        });

        let mut pool = Self {
            name: config.name,
            shared,
            workers: Vec::with_capacity(config.workers),
        };

        for index in 0..config.workers {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", pool.name, index))
                .spawn(move || shared.work())
                .map_err(PoolError::Spawn)?;
            pool.workers.push(handle);
        }

        debug!("pool {} started with {} workers", pool.name, config.workers);
        Ok(pool)
    }

    /// Queue a task and wake one idle worker.
    ///
    /// Once shutdown has been requested the task is dropped unexecuted and
    /// `PoolError::Stopped` is returned.
    pub fn enqueue<F>(&self, job: F) -> Result<TaskId, PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = {
            let mut queue = self
                .shared
                .queue
                .lock()
                .map_err(|_| PoolError::Poisoned("enqueue"))?;
            if !queue.state.accepts_work() {
                drop(queue);
                PoolCounters::bump(&self.shared.counters.rejected);
                warn!("pool {} rejected a task: shutting down", self.name);
                return Err(PoolError::Stopped);
            }
            let id = TaskId(queue.next_id);
            queue.next_id += 1;
            queue.tasks.push_back(Task::new(id, Box::new(job)));
            PoolCounters::bump(&self.shared.counters.submitted);
            id
        };

        self.shared.available.notify_one();
        trace!("pool {} queued {}", self.name, id);
        Ok(id)
    }

    /// Register a hook that is notified once when shutdown starts.
    ///
    /// Fails with `PoolError::Stopped` if shutdown already started.
    pub(crate) fn on_shutdown(&self, hook: Weak<dyn ShutdownHook>) -> Result<(), PoolError> {
        let mut queue = self
            .shared
            .queue
            .lock()
            .map_err(|_| PoolError::Poisoned("on_shutdown"))?;
        if !queue.state.accepts_work() {
            return Err(PoolError::Stopped);
        }
        queue.hooks.retain(|hook| hook.strong_count() > 0);
        queue.hooks.push(hook);
        Ok(())
    }

    /// Block until the queue is empty and no task is running, or until
    /// `timeout` elapses. Returns `false` on timeout.
    ///
    /// A long-lived task (such as a hosted dispatcher drain loop) keeps the
    /// pool busy, so this only returns `true` once that task finishes.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let queue = self.shared.lock_queue();
        let (_queue, result) = self
            .shared
            .idle
            .wait_timeout_while(queue, timeout, |queue| !queue.is_idle())
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of worker threads the pool was started with.
    pub fn workers(&self) -> usize {
        self.shared.size
    }

    /// Number of queued tasks not yet picked up by a worker.
    pub fn pending(&self) -> usize {
        self.shared.lock_queue().tasks.len()
    }

    pub fn state(&self) -> Lifecycle {
        self.shared.lock_queue().state
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.counters.snapshot(self.shared.size)
    }

    /// Stop intake, drain queued tasks, join every worker.
    /// Returns the final statistics.
    pub fn shutdown(mut self) -> PoolStats {
        self.stop_and_join();
        self.stats()
    }

    /// Stop accepting tasks without waiting. Queued tasks still run;
    /// `shutdown` or drop joins the workers.
    pub fn signal_stop(&self) {
        let hooks = {
            let mut queue = self.shared.lock_queue();
            if queue.state.advance(Lifecycle::Stopping) {
                debug!("pool {} stopping with {} pending", self.name, queue.tasks.len());
            }
            mem::take(&mut queue.hooks)
        };

        for hook in hooks.iter().filter_map(Weak::upgrade) {
            hook.on_pool_shutdown();
        }
        self.shared.available.notify_all();
    }

    fn stop_and_join(&mut self) {
        self.signal_stop();

        let current = thread::current().id();
        let mut detached = false;
        for handle in self.workers.drain(..) {
            if handle.thread().id() == current {
                // Dropped from inside one of its own tasks; joining would deadlock.
                detached = true;
                continue;
            }
            if handle.join().is_err() {
                error!("pool {} worker thread panicked", self.name);
            }
        }

        let mut queue = self.shared.lock_queue();
        if detached {
            queue.detached = true;
            return;
        }
        if queue.state.advance(Lifecycle::Stopped) {
            debug!("pool {} stopped", self.name);
        }
        drop(queue);
        self.shared.idle.notify_all();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

impl PoolShared {
    fn lock_queue(&self) -> MutexGuard<'_, PoolQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn work(&self) {
        let name = thread::current().name().unwrap_or("worker").to_string();
        debug!("{} started", name);

        let mut queue = self.lock_queue();
        loop {
            if let Some(task) = queue.tasks.pop_front() {
                queue.active += 1;
                drop(queue);

                let id = task.id();
                match task.run() {
                    Ok(()) => {
                        PoolCounters::bump(&self.counters.completed);
                        trace!("{} finished {}", name, id);
                    }
                    Err(message) => {
                        PoolCounters::bump(&self.counters.panicked);
                        error!("{} task {} panicked: {}", name, id, message);
                    }
                }

                queue = self.lock_queue();
                queue.active -= 1;
                if queue.is_idle() {
                    self.idle.notify_all();
                }
                continue;
            }

            if !queue.state.is_running() {
                break;
            }
            queue = self
                .available
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if queue.detached && queue.state.advance(Lifecycle::Stopped) {
            debug!("{} stopped the pool on exit", name);
        }
        drop(queue);

        debug!("{} exiting", name);
    }
}
