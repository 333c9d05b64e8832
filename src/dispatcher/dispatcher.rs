//! The dispatcher: typed publish/subscribe over one FIFO drain loop.

use std::any::Any;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use log::{debug, error, trace, warn};

use super::registry::{self, Registry, SubscriptionId};
use super::stats::{DispatchCounters, DispatchStats};
use super::{DispatchError, Envelope, EventKind, HandlerFault};
use crate::config::DispatcherConfig;
use crate::lifecycle::Lifecycle;
use crate::pool::{ShutdownHook, TaskId, WorkerPool};

/// In-process event dispatcher.
///
/// Publishers enqueue typed payloads under an [`EventKind`]; a single drain
/// loop pops them in publish order and calls every handler registered for
/// the kind, in registration order.
///
/// Handlers run synchronously on the drain context: a slow handler delays
/// every event behind it. Handler panics, failures and payload type
/// mismatches are caught per invocation, logged and counted; the drain loop
/// keeps going.
///
/// On shutdown the dispatcher stops accepting events, drains everything
/// already queued, then waits for the drain context to exit.
///
/// ## Example
///
/// ```
/// use pooled_bus::Dispatcher;
/// use std::sync::{Arc, Mutex};
/// use std::time::Duration;
///
/// let bus = Dispatcher::new().unwrap();
/// let seen = Arc::new(Mutex::new(Vec::new()));
///
/// let log = Arc::clone(&seen);
/// bus.subscribe(1, move |value: Arc<i32>| log.lock().unwrap().push(*value));
///
/// bus.publish(1, 42).unwrap();
/// assert!(bus.flush(Duration::from_secs(1)));
/// assert_eq!(*seen.lock().unwrap(), vec![42]);
/// ```
pub struct Dispatcher {
    shared: Arc<DispatchShared>,
    drain: Option<DrainContext>,
}

/// Where the drain loop runs.
enum DrainContext {
    /// A thread owned by the dispatcher.
    Thread(JoinHandle<()>),
    /// A task on a worker pool; `done` disconnects when the task finishes.
    /// `Receiver` is `!Sync`, the mutex keeps the dispatcher shareable.
    Hosted {
        task: TaskId,
        done: Mutex<Receiver<()>>,
    },
}

struct DispatchShared {
    name: String,
    max_pending: Option<usize>,
    queue: Mutex<EventQueue>,
    /// Signalled when an envelope arrives or a stop is requested.
    ready: Condvar,
    /// Signalled when the queue is empty and nothing is in flight.
    idle: Condvar,
    registry: Registry,
    counters: DispatchCounters,
}

struct EventQueue {
    events: VecDeque<Envelope>,
    state: Lifecycle,
    in_flight: bool,
    next_sequence: u64,
    /// Thread currently running the drain loop.
    drain_thread: Option<ThreadId>,
    /// Set when the dispatcher was stopped from its own drain thread; the
    /// drain loop marks it `Stopped` on exit.
    detached: bool,
}

impl EventQueue {
    fn is_idle(&self) -> bool {
        self.events.is_empty() && !self.in_flight
    }
}

impl Dispatcher {
    /// Start a dispatcher with its own drain thread and default config.
    pub fn new() -> Result<Self, DispatchError> {
        Self::with_config(DispatcherConfig::default())
    }

    /// Start a dispatcher with its own drain thread, named after the config.
    pub fn with_config(config: DispatcherConfig) -> Result<Self, DispatchError> {
        config.validate()?;
        let shared = Arc::new(DispatchShared::new(&config));

        let drain = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || drain.run())
            .map_err(DispatchError::Spawn)?;

        debug!("dispatcher {} started on its own thread", config.name);
        Ok(Self {
            shared,
            drain: Some(DrainContext::Thread(handle)),
        })
    }

    /// Start a dispatcher whose drain loop runs as a task on `pool`.
    ///
    /// The drain loop occupies one worker for the dispatcher's lifetime.
    /// Shutting the pool down stops this dispatcher first, so the pool can
    /// always join its workers; events published afterwards are rejected.
    pub fn on_pool(pool: &WorkerPool, config: DispatcherConfig) -> Result<Self, DispatchError> {
        config.validate()?;
        let shared = Arc::new(DispatchShared::new(&config));

        let weak: Weak<DispatchShared> = Arc::downgrade(&shared);
        let hook: Weak<dyn ShutdownHook> = weak;
        pool.on_shutdown(hook).map_err(DispatchError::PoolUnavailable)?;

        let (done_tx, done) = mpsc::channel();
        let drain = Arc::clone(&shared);
        let task = pool
            .enqueue(move || {
                drain.run();
                let _ = done_tx.send(());
            })
            .map_err(DispatchError::PoolUnavailable)?;

        debug!(
            "dispatcher {} hosted on pool {} as {}",
            config.name,
            pool.name(),
            task
        );
        Ok(Self {
            shared,
            drain: Some(DrainContext::Hosted {
                task,
                done: Mutex::new(done),
            }),
        })
    }

    /// Register `handler` for events of `kind` carrying a `T` payload.
    ///
    /// Handlers of the same kind run in registration order. If an event of
    /// this kind carries a different payload type, the handler is skipped and
    /// a [`HandlerFault::TypeMismatch`] is logged.
    pub fn subscribe<T, F>(&self, kind: impl Into<EventKind>, handler: F) -> SubscriptionId
    where
        T: Any + Send + Sync,
        F: Fn(Arc<T>) + Send + Sync + 'static,
    {
        let erased = registry::typed(move |payload: Arc<T>| {
            handler(payload);
            Ok::<(), Infallible>(())
        });
        self.register(kind.into(), erased)
    }

    /// Register a fallible handler. An `Err` is logged as
    /// [`HandlerFault::Failed`] and counted; delivery continues.
    pub fn try_subscribe<T, F, E>(&self, kind: impl Into<EventKind>, handler: F) -> SubscriptionId
    where
        T: Any + Send + Sync,
        F: Fn(Arc<T>) -> Result<(), E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        self.register(kind.into(), registry::typed(handler))
    }

    /// Register a handler that receives the raw envelope, whatever its
    /// payload type.
    pub fn subscribe_envelope<F>(&self, kind: impl Into<EventKind>, handler: F) -> SubscriptionId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.register(kind.into(), registry::raw(handler))
    }

    fn register(
        &self,
        kind: EventKind,
        erased: (&'static str, Box<registry::ErasedHandler>),
    ) -> SubscriptionId {
        let payload_type = erased.0;
        let id = self.shared.registry.insert(kind, erased);
        debug!(
            "dispatcher {}: {} subscribed to {} ({})",
            self.shared.name, id, kind, payload_type
        );
        id
    }

    /// Remove a subscription. Returns whether it was registered.
    ///
    /// Envelopes already handed to the drain loop may still reach it.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.shared.registry.remove(id);
        if removed {
            debug!("dispatcher {}: {} unsubscribed", self.shared.name, id);
        }
        removed
    }

    /// Number of handlers registered for `kind`.
    pub fn subscriber_count(&self, kind: impl Into<EventKind>) -> usize {
        self.shared.registry.count(kind.into())
    }

    /// Queue `payload` for delivery to the handlers of `kind`.
    ///
    /// Returns the envelope's sequence number without waiting for delivery.
    /// Rejected with [`DispatchError::Stopped`] once shutdown has started.
    pub fn publish<T>(&self, kind: impl Into<EventKind>, payload: T) -> Result<u64, DispatchError>
    where
        T: Any + Send + Sync,
    {
        self.publish_shared(kind, Arc::new(payload))
    }

    /// Queue an already shared payload; the caller keeps its handle.
    pub fn publish_shared<T>(
        &self,
        kind: impl Into<EventKind>,
        payload: Arc<T>,
    ) -> Result<u64, DispatchError>
    where
        T: Any + Send + Sync,
    {
        let kind = kind.into();
        let sequence = {
            let mut queue = self
                .shared
                .queue
                .lock()
                .map_err(|_| DispatchError::Poisoned("publish"))?;
            if !queue.state.accepts_work() {
                drop(queue);
                return Err(self.shared.reject(kind, DispatchError::Stopped));
            }
            if let Some(limit) = self.shared.max_pending {
                if queue.events.len() >= limit {
                    drop(queue);
                    return Err(self.shared.reject(kind, DispatchError::QueueFull { limit }));
                }
            }
            let sequence = queue.next_sequence;
            queue.next_sequence += 1;
            queue.events.push_back(Envelope::new(kind, sequence, payload));
            DispatchCounters::bump(&self.shared.counters.published);
            sequence
        };

        self.shared.ready.notify_one();
        trace!(
            "dispatcher {}: queued {} #{}",
            self.shared.name,
            kind,
            sequence
        );
        Ok(sequence)
    }

    /// Block until every queued envelope has been delivered, or `timeout`
    /// elapses. Returns `false` on timeout.
    pub fn flush(&self, timeout: Duration) -> bool {
        let queue = self.shared.lock_queue();
        let (_queue, result) = self
            .shared
            .idle
            .wait_timeout_while(queue, timeout, |queue| !queue.is_idle())
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }

    /// Number of envelopes waiting for the drain loop.
    pub fn pending(&self) -> usize {
        self.shared.lock_queue().events.len()
    }

    pub fn state(&self) -> Lifecycle {
        self.shared.lock_queue().state
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn stats(&self) -> DispatchStats {
        self.shared.counters.snapshot()
    }

    /// Stop accepting events without waiting. Queued envelopes are still
    /// delivered; `shutdown` or drop waits for the drain context.
    pub fn signal_stop(&self) {
        self.shared.request_stop();
    }

    /// Stop intake, deliver what is queued, wait for the drain context.
    /// Returns the final statistics.
    pub fn shutdown(mut self) -> DispatchStats {
        self.stop_and_wait();
        self.stats()
    }

    fn stop_and_wait(&mut self) {
        self.signal_stop();

        // A handler dropping the last handle runs on the drain context itself;
        // waiting for it would deadlock.
        let on_drain = self.shared.lock_queue().drain_thread == Some(thread::current().id());

        match self.drain.take() {
            Some(DrainContext::Thread(handle)) => {
                if !on_drain && handle.join().is_err() {
                    error!("dispatcher {} drain thread panicked", self.shared.name);
                }
            }
            Some(DrainContext::Hosted { task, done }) => {
                if !on_drain {
                    // Disconnects without a message if the task was dropped unexecuted.
                    let done = done.into_inner().unwrap_or_else(PoisonError::into_inner);
                    let _ = done.recv();
                    trace!("dispatcher {}: hosted {} finished", self.shared.name, task);
                }
            }
            None => return,
        }

        let mut queue = self.shared.lock_queue();
        if on_drain {
            queue.detached = true;
            return;
        }
        if queue.state.advance(Lifecycle::Stopped) {
            debug!("dispatcher {} stopped", self.shared.name);
        }
        drop(queue);
        self.shared.idle.notify_all();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop_and_wait();
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

impl ShutdownHook for DispatchShared {
    fn on_pool_shutdown(&self) {
        self.request_stop();
    }
}

impl DispatchShared {
    fn new(config: &DispatcherConfig) -> Self {
        Self {
            name: config.name.clone(),
            max_pending: config.max_pending,
            queue: Mutex::new(EventQueue {
                events: VecDeque::new(),
                state: Lifecycle::Running,
                in_flight: false,
                next_sequence: 0,
                drain_thread: None,
                detached: false,
            }),
            ready: Condvar::new(),
            idle: Condvar::new(),
            registry: Registry::default(),
            counters: DispatchCounters::default(),
        }
    }

    fn lock_queue(&self) -> MutexGuard<'_, EventQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request_stop(&self) {
        let mut queue = self.lock_queue();
        if queue.state.advance(Lifecycle::Stopping) {
            debug!(
                "dispatcher {} stopping with {} pending",
                self.name,
                queue.events.len()
            );
        }
        drop(queue);
        self.ready.notify_all();
    }

    fn reject(&self, kind: EventKind, err: DispatchError) -> DispatchError {
        DispatchCounters::bump(&self.counters.rejected);
        warn!("dispatcher {}: rejected {}: {}", self.name, kind, err);
        err
    }

    /// The drain loop. Exits once a stop is requested and the queue is empty.
    fn run(&self) {
        debug!("dispatcher {} drain loop started", self.name);

        let mut queue = self.lock_queue();
        queue.drain_thread = Some(thread::current().id());
        loop {
            if let Some(envelope) = queue.events.pop_front() {
                queue.in_flight = true;
                drop(queue);

                DispatchCounters::bump(&self.counters.dispatched);
                self.deliver(&envelope);
                drop(envelope);

                queue = self.lock_queue();
                queue.in_flight = false;
                if queue.events.is_empty() {
                    self.idle.notify_all();
                }
                continue;
            }

            if !queue.state.is_running() {
                break;
            }
            queue = self
                .ready
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
        queue.drain_thread = None;
        if queue.detached && queue.state.advance(Lifecycle::Stopped) {
            debug!("dispatcher {} stopped", self.name);
            self.idle.notify_all();
        }
        drop(queue);

        debug!("dispatcher {} drain loop exiting", self.name);
    }

    fn deliver(&self, envelope: &Envelope) {
        let subscriptions = self.registry.handlers(envelope.kind());
        if subscriptions.is_empty() {
            DispatchCounters::bump(&self.counters.unrouted);
            trace!(
                "dispatcher {}: no subscribers for {} #{}",
                self.name,
                envelope.kind(),
                envelope.sequence()
            );
            return;
        }

        for subscription in &subscriptions {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| subscription.invoke(envelope)));
            match outcome {
                Ok(Ok(())) => DispatchCounters::bump(&self.counters.delivered),
                Ok(Err(fault @ HandlerFault::TypeMismatch { .. })) => {
                    DispatchCounters::bump(&self.counters.type_mismatches);
                    warn!(
                        "dispatcher {}: {} skipped #{}: {}",
                        self.name,
                        subscription.id(),
                        envelope.sequence(),
                        fault
                    );
                }
                Ok(Err(fault)) => {
                    DispatchCounters::bump(&self.counters.handler_failures);
                    warn!(
                        "dispatcher {}: {} failed on #{}: {}",
                        self.name,
                        subscription.id(),
                        envelope.sequence(),
                        fault
                    );
                }
                Err(payload) => {
                    DispatchCounters::bump(&self.counters.handler_panics);
                    error!(
                        "dispatcher {}: {} ({}) panicked on {} #{}: {}",
                        self.name,
                        subscription.id(),
                        subscription.payload_type(),
                        envelope.kind(),
                        envelope.sequence(),
                        crate::panic::message(payload.as_ref())
                    );
                }
            }
        }
    }
}
