//! Worker pool - a fixed set of threads draining one shared task queue.
//!
//! ```text
//!  enqueue(task) ──▶ ┌───────────────────────────┐
//!  enqueue(task) ──▶ │  VecDeque<Task> (FIFO)    │ ◀── Mutex + Condvar
//!                    └───────────────────────────┘
//!                       │         │          │
//!                       ▼         ▼          ▼
//!                  worker-0   worker-1 … worker-N-1
//! ```
//!
//! The pool can also host a [`Dispatcher`](crate::Dispatcher) drain loop as
//! one of its tasks; see [`Dispatcher::on_pool`](crate::Dispatcher::on_pool).

mod error;
mod stats;
mod task;
mod worker_pool;

pub use error::PoolError;
pub use stats::PoolStats;
pub use task::TaskId;
pub use worker_pool::WorkerPool;
pub(crate) use worker_pool::ShutdownHook;
